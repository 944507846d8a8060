//! Exchange error taxonomy and classification of raw wire failures.

use thiserror::Error;

use super::Operation;

/// A single failed attempt as reported by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Malformed(String),

    /// Error codes from the exchange envelope, e.g. `EOrder:Insufficient funds`
    #[error("{}", .0.join(", "))]
    Exchange(Vec<String>),

    /// The request could not be signed, e.g. no credentials configured
    #[error("Cannot sign request: {0}")]
    Signing(String),
}

/// Whether retrying may change the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Rejected(RejectReason),
}

/// Business reason behind a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientFunds,
    UnknownPair,
    BelowMinimum,
    InvalidVolume,
    InvalidPrice,
    Permission,
    UnknownOrder,
    Other,
}

const TRANSIENT_CODES: &[&str] = &[
    "EAPI:Invalid nonce",
    "EAPI:Rate limit exceeded",
    "EOrder:Rate limit exceeded",
    "EService:Unavailable",
    "EService:Busy",
    "EGeneral:Temporary lockout",
    "EGeneral:Internal error",
];

impl TransportError {
    pub fn classify(&self) -> Classification {
        match self {
            TransportError::Network(_) | TransportError::Timeout | TransportError::Malformed(_) => {
                Classification::Transient
            }
            TransportError::Status { status, .. } => {
                if *status == 429 || *status >= 500 {
                    Classification::Transient
                } else if *status == 401 || *status == 403 {
                    Classification::Rejected(RejectReason::Permission)
                } else {
                    Classification::Rejected(RejectReason::Other)
                }
            }
            TransportError::Exchange(codes) => classify_codes(codes),
            TransportError::Signing(_) => Classification::Rejected(RejectReason::Permission),
        }
    }
}

/// Classify exchange error codes. Any transient code makes the whole response
/// transient; otherwise the first code decides the reject reason.
fn classify_codes(codes: &[String]) -> Classification {
    if codes
        .iter()
        .any(|code| TRANSIENT_CODES.iter().any(|t| code.starts_with(t)))
    {
        return Classification::Transient;
    }

    let Some(code) = codes.first() else {
        return Classification::Rejected(RejectReason::Other);
    };

    let reason = if code.contains("Insufficient") {
        RejectReason::InsufficientFunds
    } else if code.starts_with("EQuery:Unknown asset pair") || code.contains("Invalid asset pair")
    {
        RejectReason::UnknownPair
    } else if code.contains("minimum not met") {
        RejectReason::BelowMinimum
    } else if code.starts_with("EGeneral:Invalid arguments:volume") {
        RejectReason::InvalidVolume
    } else if code.starts_with("EGeneral:Invalid arguments:price")
        || code.starts_with("EOrder:Invalid price")
    {
        RejectReason::InvalidPrice
    } else if code.starts_with("EGeneral:Permission denied")
        || code.starts_with("EAPI:Invalid key")
        || code.starts_with("EAPI:Invalid signature")
    {
        RejectReason::Permission
    } else if code.contains("Unknown order") {
        RejectReason::UnknownOrder
    } else {
        RejectReason::Other
    };

    Classification::Rejected(reason)
}

/// Final outcome of an exchange call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Retries exhausted on transient failures. The request may still have
    /// taken effect on the exchange.
    #[error("{operation} did not complete after {attempts} attempt(s): {reason}")]
    Transient {
        operation: Operation,
        attempts: u32,
        reason: String,
    },

    /// The exchange refused the request; retrying will not help.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: Operation,
        kind: RejectReason,
        reason: String,
    },
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient { .. })
    }
}
