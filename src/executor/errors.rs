//! Error classification (§4.6): pure substring match against the
//! lower-cased error message.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    Funds,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Validation => "validation",
            ErrorKind::Funds => "funds",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const NETWORK_NEEDLES: &[&str] = &["connection refused", "timeout", "dial", "eof", "network"];
const API_NEEDLES: &[&str] = &["api error", "invalid", "bad request", "400", "403", "404", "500"];
const VALIDATION_NEEDLES: &[&str] = &["missing", "required", "not configured"];
const FUNDS_NEEDLES: &[&str] = &["insufficient", "balance", "funds"];

/// Classifies `message` by substring match against its lower-cased
/// form, in the fixed precedence order network -> api -> validation ->
/// funds -> unknown.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if NETWORK_NEEDLES.iter().any(|n| lower.contains(n)) {
        ErrorKind::Network
    } else if API_NEEDLES.iter().any(|n| lower.contains(n)) {
        ErrorKind::Api
    } else if VALIDATION_NEEDLES.iter().any(|n| lower.contains(n)) {
        ErrorKind::Validation
    } else if FUNDS_NEEDLES.iter().any(|n| lower.contains(n)) {
        ErrorKind::Funds
    } else {
        ErrorKind::Unknown
    }
}

/// A canonical message for each kind, used only by the round-trip
/// property test (`classify_error(message_for(kind)) == kind`).
pub fn message_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "connection refused while dialing exchange",
        ErrorKind::Api => "api error: bad request",
        ErrorKind::Validation => "required field missing",
        ErrorKind::Funds => "insufficient funds for order",
        ErrorKind::Unknown => "the cat knocked over the order book",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_substrings() {
        assert_eq!(classify_error("Connection Refused by host"), ErrorKind::Network);
        assert_eq!(classify_error("API error: Invalid side"), ErrorKind::Api);
        assert_eq!(classify_error("nonce is required"), ErrorKind::Validation);
        assert_eq!(classify_error("Insufficient balance"), ErrorKind::Funds);
        assert_eq!(classify_error("gremlins"), ErrorKind::Unknown);
    }

    #[test]
    fn round_trip_through_canonical_message() {
        for kind in [
            ErrorKind::Network,
            ErrorKind::Api,
            ErrorKind::Validation,
            ErrorKind::Funds,
            ErrorKind::Unknown,
        ] {
            assert_eq!(classify_error(message_for(kind)), kind);
        }
    }
}
