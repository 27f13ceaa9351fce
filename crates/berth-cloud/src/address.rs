use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::{CloudError, CloudResult};

pub const DEFAULT_ECHO_URL: &str = "http://whatismyip.akamai.com";

/// Public address the operator's traffic originates from.
#[async_trait]
pub trait PublicAddress: Send + Sync {
    async fn operator_ip(&self) -> CloudResult<IpAddr>;
}

/// Asks an HTTP echo service for the caller's address.
pub struct HttpEcho {
    client: reqwest::Client,
    url: String,
}

impl HttpEcho {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_ECHO_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Default for HttpEcho {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublicAddress for HttpEcho {
    async fn operator_ip(&self) -> CloudResult<IpAddr> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let ip = parse_ip(&body)
            .ok_or_else(|| CloudError::decode(&self.url, format!("not an address: {body:?}")))?;
        debug!(target: "berth.cloud.address", %ip, "operator address");
        Ok(ip)
    }
}

/// Fixed address, for operators behind a known egress.
pub struct StaticAddress(pub IpAddr);

#[async_trait]
impl PublicAddress for StaticAddress {
    async fn operator_ip(&self) -> CloudResult<IpAddr> {
        Ok(self.0)
    }
}

fn parse_ip(body: &str) -> Option<IpAddr> {
    body.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trimmed_body() {
        assert_eq!(parse_ip(" 203.0.113.7\n"), Some("203.0.113.7".parse().unwrap()));
        assert_eq!(parse_ip("<html>"), None);
    }

    #[tokio::test]
    async fn static_address_is_returned_verbatim() {
        let addr = StaticAddress("198.51.100.1".parse().unwrap());
        assert_eq!(addr.operator_ip().await.unwrap().to_string(), "198.51.100.1");
    }
}
