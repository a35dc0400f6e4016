//! Validation of user-supplied AtlasMap fields

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum length of a fully qualified host name (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid host name {hostname:?}: {reason}")]
    InvalidHostname { hostname: String, reason: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

// RFC 1123 label: lower or upper alphanumerics and hyphens, 1-63 chars,
// starting and ending with an alphanumeric
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").expect("valid regex")
});

fn invalid(hostname: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidHostname {
        hostname: hostname.to_string(),
        reason: reason.into(),
    }
}

/// Validates a host name used for a Route or Ingress rule.
///
/// Accepts single labels (`atlasmap`) as well as dotted names
/// (`atlasmap.apps.example.com`). The Ingress fallback host
/// `<name>-<namespace>` goes through here too, since joining two labels
/// can exceed the 63-character label limit.
pub fn validate_hostname(hostname: &str) -> ValidationResult<&str> {
    if hostname.is_empty() {
        return Err(invalid(hostname, "host name cannot be empty"));
    }

    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(invalid(
            hostname,
            format!("host name exceeds {MAX_HOSTNAME_LEN} characters"),
        ));
    }

    if let Some(label) = hostname.split('.').find(|l| !LABEL_REGEX.is_match(l)) {
        let reason = if label.is_empty() {
            "host name contains an empty label".to_string()
        } else {
            format!("invalid label {label:?}")
        };
        return Err(invalid(hostname, reason));
    }

    Ok(hostname)
}
