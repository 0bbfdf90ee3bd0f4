//! WebSocket close codes used by the hub.

/// Close codes the server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Ordinary close.
    Normal = 1000,
    /// Missing or invalid credential; the connection was never admitted.
    PolicyViolation = 1008,
    /// The server evicted the connection (heartbeat timeout, send failure,
    /// or displaced by a newer session of the same identity).
    Evicted = 4000,
}

impl CloseCode {
    /// Numeric close code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Short human-readable close reason.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "bye",
            CloseCode::PolicyViolation => "missing or invalid credential",
            CloseCode::Evicted => "evicted by server",
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        code.code()
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(CloseCode::Normal),
            1008 => Ok(CloseCode::PolicyViolation),
            4000 => Ok(CloseCode::Evicted),
            _ => Err("Unknown close code"),
        }
    }
}
