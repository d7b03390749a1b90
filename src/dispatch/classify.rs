//! Transport failure classification.

use std::error::Error as StdError;
use std::io;

use crate::model::ErrorType;

/// Classify a reqwest failure. Never fails; unknown causes map to `Other`.
pub fn classify(err: &reqwest::Error) -> ErrorType {
    if err.is_timeout() {
        return ErrorType::Timeout;
    }
    classify_chain(err)
}

/// Walk an error's source chain looking for a recognizable cause.
pub fn classify_chain(err: &(dyn StdError + 'static)) -> ErrorType {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return ErrorType::ConnectionRefused,
                io::ErrorKind::TimedOut => return ErrorType::Timeout,
                _ => {}
            }
        }
        if looks_like_dns_failure(&cause.to_string()) {
            return ErrorType::DnsError;
        }
        current = cause.source();
    }
    ErrorType::Other
}

/// Render an error with its causes, outermost first.
pub fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        current = cause.source();
    }
    parts.join(": ")
}

fn looks_like_dns_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    [
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
        "nodename nor servname",
        "temporary failure in name resolution",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}
