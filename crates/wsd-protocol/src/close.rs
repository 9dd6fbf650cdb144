//! WebSocket close status codes (RFC 6455 §7.4.1).

/// Close codes the dispatcher sends or interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    Unsupported,
    InvalidPayload,
    PolicyViolation,
    MessageTooBig,
    InternalError,

    // Anything else, including application codes (4000-4999)
    Other(u16),
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::Unsupported => 1003,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::InternalError => 1011,
            Self::Other(c) => *c,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::Unsupported,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1011 => Self::InternalError,
            c => Self::Other(c),
        }
    }

    /// Parse the status code from the first two bytes of a close frame payload.
    /// An empty payload means "no status received" and yields `None`.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [hi, lo, ..] => Some(Self::from_code(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
