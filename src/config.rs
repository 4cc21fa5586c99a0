use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{ProviderError, Result};

pub const ENV_HOST: &str = "FREEIPA_HOST";
pub const ENV_USERNAME: &str = "FREEIPA_USERNAME";
pub const ENV_PASSWORD: &str = "FREEIPA_PASSWORD";
pub const ENV_INSECURE: &str = "FREEIPA_INSECURE";
pub const ENV_CA_CERT: &str = "FREEIPA_CA_CERT";

/// Explicitly configured provider settings; `None` falls back to the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure: Option<bool>,
    pub ca_certificate: Option<PathBuf>,
}

/// Fully resolved connection settings for one FreeIPA server.
#[derive(Clone)]
pub struct ProviderConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub ca_certificate: Option<PathBuf>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("ca_certificate", &self.ca_certificate)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve settings against the process environment.
    pub fn resolve(explicit: ProviderSettings) -> Result<(Self, Vec<String>)> {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Explicit settings win over `env`; empty values count as missing.
    pub fn resolve_with(
        explicit: ProviderSettings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Vec<String>)> {
        let trimmed = |v: Option<String>| {
            v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let pick = |value: Option<String>, key: &str| trimmed(value).or_else(|| trimmed(env(key)));

        let host = pick(explicit.host, ENV_HOST);
        let username = pick(explicit.username, ENV_USERNAME);
        let password = explicit
            .password
            .filter(|p| !p.is_empty())
            .or_else(|| env(ENV_PASSWORD).filter(|p| !p.is_empty()));
        let insecure = explicit
            .insecure
            .unwrap_or_else(|| env(ENV_INSECURE).and_then(|v| parse_bool(&v)).unwrap_or(false));
        let ca_certificate = explicit
            .ca_certificate
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| pick(None, ENV_CA_CERT).map(PathBuf::from));

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push(format!("host ({ENV_HOST})"));
        }
        if username.is_none() {
            missing.push(format!("username ({ENV_USERNAME})"));
        }
        if password.is_none() {
            missing.push(format!("password ({ENV_PASSWORD})"));
        }
        let (Some(host), Some(username), Some(password)) = (host, username, password) else {
            return Err(ProviderError::config(format!(
                "missing or empty FreeIPA settings: {}",
                missing.join(", ")
            )));
        };

        let mut warnings = Vec::new();
        if insecure {
            warnings.push(
                "TLS verification is disabled; the connection to FreeIPA cannot be trusted"
                    .to_string(),
            );
        } else if ca_certificate.is_none() {
            warnings.push(format!(
                "no CA certificate configured ({ENV_CA_CERT}); using the system trust store"
            ));
        }
        for w in &warnings {
            warn!("{w}");
        }

        Ok((
            Self {
                host,
                username,
                password,
                insecure,
                ca_certificate,
            },
            warnings,
        ))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Some(true),
        "0" | "f" | "false" | "no" => Some(false),
        _ => None,
    }
}
