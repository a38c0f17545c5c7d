//! Room admission status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The admission gate for a room.
///
/// Transitions are free-form; what each value means for joiners:
///
/// - **Inactive**: closed to everyone.
/// - **Open**: any new member may join. The default.
/// - **Locked**: only previously known members may (re)connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Inactive,
    #[default]
    Open,
    Locked,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "Inactive"),
            Self::Open => write!(f, "Open"),
            Self::Locked => write!(f, "Locked"),
        }
    }
}
