//! Registration input parsing
//!
//! Operators register their server with a single line:
//! `name:host:username:password`. The host may be an IPv6 literal, so the
//! line is split from both ends: the first field is the name, the last two
//! are username and password, and whatever sits between is the host.

use std::net::IpAddr;

use thiserror::Error;

use super::types::ServerProfile;

const MIN_NAME_LEN: usize = 3;
const MIN_USERNAME_LEN: usize = 2;
const MIN_SECRET_LEN: usize = 4;

/// Why a registration line was rejected
///
/// The `Display` text is shown to the operator as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid format. Use name:host:username:password")]
    Malformed,

    #[error("Server name must be at least 3 characters long")]
    NameTooShort,

    #[error("Server name may only contain latin letters, digits, '-' and '_'")]
    NameInvalidChars,

    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    InvalidHost(String),

    #[error("Username must be at least 2 characters long")]
    UsernameTooShort,

    #[error("Password must be at least 4 characters long")]
    SecretTooShort,
}

/// Parse and validate a registration line into a profile
pub fn parse_registration(input: &str) -> Result<ServerProfile, ValidationError> {
    let input = input.trim();
    let (name, rest) = input.split_once(':').ok_or(ValidationError::Malformed)?;

    let mut tail = rest.rsplitn(3, ':');
    let (secret, username, host) = match (tail.next(), tail.next(), tail.next()) {
        (Some(secret), Some(username), Some(host)) => (secret, username, host),
        _ => return Err(ValidationError::Malformed),
    };

    validate_name(name)?;
    let host = validate_host(host)?;

    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(ValidationError::UsernameTooShort);
    }
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(ValidationError::SecretTooShort);
    }

    Ok(ServerProfile::new(name, host, username, secret))
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(ValidationError::NameTooShort);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::NameInvalidChars);
    }
    Ok(())
}

/// Returns the canonical textual form of the address
fn validate_host(host: &str) -> Result<String, ValidationError> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    literal
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ValidationError::InvalidHost(host.to_string()))
}
