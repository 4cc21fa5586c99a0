use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::ProviderError;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("{field} is empty")]
    Empty { field: &'static str },
    #[error("{field} '{value}' may only contain letters, digits, '_', '.', '-' and a trailing '$'")]
    InvalidName { field: &'static str, value: String },
    #[error("DNS label '{0}' too long (max 63 characters)")]
    LabelTooLong(String),
    #[error("DNS label '{0}' contains invalid characters (only a-z, 0-9, '-' and '_' allowed)")]
    InvalidLabel(String),
    #[error("DNS label '{0}' must not start or end with '-'")]
    LeadingOrTrailingHyphen(String),
    #[error("The {field} timestamp could not be parsed as RFC3339: {reason}")]
    Timestamp { field: &'static str, reason: String },
    #[error("certificate #{index} is not valid base64 DER: {reason}")]
    Certificate { index: usize, reason: String },
}

impl From<ValidationError> for ProviderError {
    fn from(err: ValidationError) -> Self {
        ProviderError::Validation(err.to_string())
    }
}

lazy_static::lazy_static! {
    /// Login and group names accepted by FreeIPA.
    static ref NAME_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9_.][a-zA-Z0-9_.-]{0,252}[a-zA-Z0-9_.$-]?$").unwrap();
    /// Letters, digits, '-' and '_' (the latter for SRV-style labels)
    static ref LABEL_RE: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

pub fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if !NAME_RE.is_match(value) {
        return Err(ValidationError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Err(ValidationError::Empty { field: "DNS label" });
    }
    if label.len() > 63 {
        return Err(ValidationError::LabelTooLong(label.to_string()));
    }
    if !LABEL_RE.is_match(label) {
        return Err(ValidationError::InvalidLabel(label.to_string()));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(ValidationError::LeadingOrTrailingHyphen(label.to_string()));
    }
    Ok(())
}

pub fn validate_fqdn_ascii(domain: &str) -> Result<(), ValidationError> {
    // trailing dot is optional
    let d = domain.trim_end_matches('.');
    if d.is_empty() {
        return Err(ValidationError::Empty { field: "zone name" });
    }
    for label in d.split('.') {
        validate_label(label)?;
    }
    Ok(())
}

pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ValidationError::Timestamp {
            field,
            reason: e.to_string(),
        })
}

pub fn validate_certificates(certs: &[String]) -> Result<(), ValidationError> {
    for (index, cert) in certs.iter().enumerate() {
        let compact: String = cert.split_whitespace().collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ValidationError::Certificate {
                index,
                reason: e.to_string(),
            })?;
    }
    Ok(())
}
