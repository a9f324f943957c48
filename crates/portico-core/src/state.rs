//! Server lifecycle states
//!
//! Transitions only move forward: `Created → Listening → Running →
//! ShuttingDown → Closed`. Any state may jump straight to `Closed` on a
//! setup failure, and `Closed` is terminal.

use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Created = 0,
    Listening = 1,
    Running = 2,
    ShuttingDown = 3,
    Closed = 4,
}

impl ServerState {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a value stored in an `AtomicU8`. Unknown values map to `Closed`.
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ServerState::Created,
            1 => ServerState::Listening,
            2 => ServerState::Running,
            3 => ServerState::ShuttingDown,
            _ => ServerState::Closed,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    #[inline]
    pub fn can_advance_to(self, next: ServerState) -> bool {
        next > self
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Created => "created",
            ServerState::Listening => "listening",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting-down",
            ServerState::Closed => "closed",
        };
        f.write_str(s)
    }
}
