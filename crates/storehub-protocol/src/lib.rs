pub mod events;
pub mod frames;

pub use frames::EventFrame;
