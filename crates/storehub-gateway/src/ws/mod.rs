pub mod connection;
pub mod send;
