use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Role a connection acts as. Fixed at connect time from the verified token;
/// never taken from a later client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Customer,
    Merchant,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Customer => "customer",
            Role::Merchant => "merchant",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(Role::Driver),
            "customer" => Ok(Role::Customer),
            "merchant" => Ok(Role::Merchant),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

/// Authenticated identity bound to a session for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("token signature mismatch")]
    BadSignature,
}

/// Token layout: `<role>.<subject>.<tag>` where the tag is the keyed SHA-256
/// of role and subject. Subjects are opaque ids and must not contain dots.
pub fn issue(role: Role, subject: &str, secret: &str) -> String {
    format!("{role}.{subject}.{}", tag(role.as_str(), subject, secret))
}

pub fn verify(token: &str, secret: &str) -> Result<Identity, AuthError> {
    let mut parts = token.split('.');
    let (role, subject, sig) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(role), Some(subject), Some(sig), None) if !subject.is_empty() => {
            (role, subject, sig)
        }
        _ => return Err(AuthError::Malformed),
    };

    let role: Role = role.parse()?;
    if tag(role.as_str(), subject, secret) != sig {
        return Err(AuthError::BadSignature);
    }

    Ok(Identity {
        role,
        subject: subject.to_string(),
    })
}

fn tag(role: &str, subject: &str, secret: &str) -> String {
    let digest = Sha256::new()
        .chain_update(secret.as_bytes())
        .chain_update(b"\x00")
        .chain_update(role.as_bytes())
        .chain_update(b"\x00")
        .chain_update(subject.as_bytes())
        .finalize();

    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue(Role::Driver, "d1", "s3cret");
        let identity = verify(&token, "s3cret").unwrap();
        assert_eq!(identity.role, Role::Driver);
        assert_eq!(identity.subject, "d1");
    }

    #[test]
    fn tampered_subject_is_rejected() {
        let token = issue(Role::Driver, "d1", "s3cret");
        let forged = token.replacen("d1", "d2", 1);
        assert_eq!(verify(&forged, "s3cret"), Err(AuthError::BadSignature));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(Role::Customer, "u7", "s3cret");
        assert_eq!(verify(&token, "other"), Err(AuthError::BadSignature));
    }

    #[test]
    fn role_cannot_be_upgraded() {
        let token = issue(Role::Customer, "u7", "s3cret");
        let forged = token.replacen("customer", "admin", 1);
        assert_eq!(verify(&forged, "s3cret"), Err(AuthError::BadSignature));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert_eq!(verify("", "s"), Err(AuthError::Malformed));
        assert_eq!(verify("driver.d1", "s"), Err(AuthError::Malformed));
        assert_eq!(verify("driver..sig", "s"), Err(AuthError::Malformed));
        assert!(matches!(
            verify("pilot.d1.deadbeef", "s"),
            Err(AuthError::UnknownRole(_))
        ));
    }
}
