use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a registered connection.
///
/// Handed out by the hub's event loop from a monotonically increasing
/// counter, so it never depends on transport metadata and is never reused
/// within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
