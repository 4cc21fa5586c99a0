use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Certificate, Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::{API_VERSION, RpcReply, RpcRequest, RpcResult};

pub struct FreeIpaClient {
    http: Client,
    base_url: String, // e.g. "https://ipa.example.lan"
    username: String,
    password: String,
    logged_in: AtomicBool,
}

impl FreeIpaClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(path) = &config.ca_certificate {
            let pem = std::fs::read(path).map_err(|e| {
                ProviderError::config(format!(
                    "cannot read CA certificate {}: {e}",
                    path.display()
                ))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                ProviderError::config(format!("invalid CA certificate {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build()?;
        let client = Self {
            http,
            base_url: base_url(&config.host),
            username: config.username.clone(),
            password: config.password.clone(),
            logged_in: AtomicBool::new(false),
        };
        info!("FreeIPA client configured for host: {}", client.base_url);
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn referer(&self) -> String {
        format!("{}/ipa", self.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/ipa/session/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn login(&self) -> Result<()> {
        let res = self
            .http
            .post(self.url("login_password"))
            .header("Referer", self.referer())
            .header("Accept", "text/plain")
            .form(&[("user", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;

        match res.status() {
            s if s.is_success() => {
                self.logged_in.store(true, Ordering::SeqCst);
                info!("logged in to {} as {}", self.base_url, self.username);
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(ProviderError::config(format!(
                "FreeIPA rejected the credentials of user {}",
                self.username
            ))),
            s => Err(ProviderError::protocol(format!("login failed with {s}"))),
        }
    }

    async fn post_json(&self, body: &RpcRequest<'_>) -> Result<reqwest::Response> {
        Ok(self
            .http
            .post(self.url("json"))
            .header("Referer", self.referer())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl IpaRpc for FreeIpaClient {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        mut options: Map<String, Value>,
    ) -> Result<RpcResult> {
        if !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }

        options
            .entry("version")
            .or_insert_with(|| Value::String(API_VERSION.into()));
        debug!(
            method,
            options = ?options.keys().collect::<Vec<_>>(),
            "calling FreeIPA"
        );
        let body = RpcRequest {
            method,
            params: (args, options),
            id: 0,
        };

        let mut res = self.post_json(&body).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            // session cookie expired
            debug!(method, "session expired, logging in again");
            self.logged_in.store(false, Ordering::SeqCst);
            self.login().await?;
            res = self.post_json(&body).await?;
        }
        if !res.status().is_success() {
            return Err(ProviderError::protocol(format!(
                "{method} failed with {}",
                res.status()
            )));
        }

        let reply = res.json::<RpcReply>().await?;
        if let Some(err) = reply.error {
            debug!(method, code = err.code, name = %err.name, "FreeIPA returned an error");
            return Err(ProviderError::Client(err));
        }
        reply.result.ok_or_else(|| {
            ProviderError::protocol(format!("{method} returned neither result nor error"))
        })
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_default_to_https() {
        assert_eq!(base_url("ipa.example.lan"), "https://ipa.example.lan");
        assert_eq!(base_url("https://ipa.example.lan/"), "https://ipa.example.lan");
        assert_eq!(base_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }
}
