//! WebSocket close codes and the reconnect policy built on them.
//!
//! Standard codes come from RFC 6455; the 4000 range is application
//! defined by Cryo.

use std::fmt;

/// A WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: unsupported data.
    UnsupportedData,
    /// 1005: no status received.
    NoStatus,
    /// 1006: abnormal closure (no close frame).
    Abnormal,
    /// 1007: invalid frame payload data.
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big.
    MessageTooBig,
    /// 1010: mandatory extension missing.
    MandatoryExtension,
    /// 1011: internal server error.
    InternalError,
    /// 1012: service restart.
    ServiceRestart,
    /// 1013: try again later.
    TryAgainLater,
    /// 1014: bad gateway.
    BadGateway,
    /// 1015: TLS handshake failure.
    TlsHandshake,
    /// 4000: client finished.
    Graceful,
    /// 4001: client-side error.
    ClientError,
    /// 4002: server-side error.
    ServerError,
    /// 4010: encryption expectation mismatch.
    CaleMismatch,
    /// 4011: encrypted handshake failed.
    CaleHandshake,
    /// Any code not listed above.
    Other(u16),
}

impl CloseCode {
    /// Numeric value of the code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::MandatoryExtension => 1010,
            Self::InternalError => 1011,
            Self::ServiceRestart => 1012,
            Self::TryAgainLater => 1013,
            Self::BadGateway => 1014,
            Self::TlsHandshake => 1015,
            Self::Graceful => 4000,
            Self::ClientError => 4001,
            Self::ServerError => 4002,
            Self::CaleMismatch => 4010,
            Self::CaleHandshake => 4011,
            Self::Other(code) => code,
        }
    }

    /// Whether a session seeing this code should try to reconnect.
    ///
    /// Codes that signal a deliberate or unrecoverable end are terminal;
    /// everything else, including unknown codes, is treated as transient.
    pub fn should_reconnect(self) -> bool {
        !matches!(
            self,
            Self::Normal
                | Self::ProtocolError
                | Self::UnsupportedData
                | Self::InvalidPayload
                | Self::PolicyViolation
                | Self::MessageTooBig
                | Self::TlsHandshake
                | Self::Graceful
                | Self::ClientError
                | Self::CaleMismatch
                | Self::CaleHandshake
        )
    }

    /// Human-readable description for logs.
    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::GoingAway => "endpoint going away",
            Self::ProtocolError => "protocol error",
            Self::UnsupportedData => "unsupported data",
            Self::NoStatus => "no status received",
            Self::Abnormal => "abnormal closure",
            Self::InvalidPayload => "invalid frame payload data",
            Self::PolicyViolation => "policy violation",
            Self::MessageTooBig => "message too big",
            Self::MandatoryExtension => "mandatory extension missing",
            Self::InternalError => "internal server error",
            Self::ServiceRestart => "service restart",
            Self::TryAgainLater => "try again later",
            Self::BadGateway => "bad gateway",
            Self::TlsHandshake => "TLS handshake failure",
            Self::Graceful => "client finished",
            Self::ClientError => "client error",
            Self::ServerError => "server error",
            Self::CaleMismatch => "CALE mismatch",
            Self::CaleHandshake => "CALE handshake failure",
            Self::Other(_) => "unknown close code",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            1012 => Self::ServiceRestart,
            1013 => Self::TryAgainLater,
            1014 => Self::BadGateway,
            1015 => Self::TlsHandshake,
            4000 => Self::Graceful,
            4001 => Self::ClientError,
            4002 => Self::ServerError,
            4010 => Self::CaleMismatch,
            4011 => Self::CaleHandshake,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.description())
    }
}
