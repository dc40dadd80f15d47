//! HTTP client for the local IPFS daemon API, with public-gateway
//! fallback for downloads.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, SecretsError};

/// Default local daemon API endpoint.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";

/// Public gateways tried, in order, after the local daemon.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://ipfs.io/ipfs/",
    "https://dweb.link/ipfs/",
    "https://cloudflare-ipfs.com/ipfs/",
];

/// IPFS client configuration.
#[derive(Debug, Clone)]
pub struct IpfsConfig {
    pub api_url: String,
    pub gateways: Vec<String>,
    pub api_timeout: std::time::Duration,
    pub gateway_timeout: std::time::Duration,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        IpfsConfig {
            api_url: DEFAULT_API_URL.to_string(),
            gateways: DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect(),
            api_timeout: std::time::Duration::from_secs(5),
            gateway_timeout: std::time::Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client over the daemon's `/api/v0` HTTP API and the gateway list.
pub struct IpfsClient {
    config: IpfsConfig,
    http: reqwest::Client,
}

impl IpfsClient {
    pub fn new(config: IpfsConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lsh-secrets/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        IpfsClient { config, http }
    }

    /// Probe `/api/v0/version`; `false` means every daemon call will be
    /// skipped and downloads go straight to the gateways.
    pub async fn daemon_available(&self) -> bool {
        let url = format!("{}/api/v0/version", self.config.api_url);
        match self
            .http
            .post(&url)
            .timeout(self.config.api_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Upload ciphertext via `/api/v0/add`; the returned CID is
    /// authoritative over any locally computed one.
    pub async fn add(&self, ciphertext: Vec<u8>) -> Result<String> {
        let url = format!("{}/api/v0/add", self.config.api_url);
        let part = reqwest::multipart::Part::bytes(ciphertext).file_name("bundle.encrypted");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(self.config.api_timeout)
            .send()
            .await
            .map_err(|e| SecretsError::NetworkUnavailable(format!("ipfs add: {e}")))?;
        if !response.status().is_success() {
            return Err(SecretsError::NetworkUnavailable(format!(
                "ipfs add returned {}",
                response.status()
            )));
        }
        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| SecretsError::NetworkUnavailable(format!("ipfs add response: {e}")))?;
        debug!(cid = %added.hash, "bundle uploaded to ipfs daemon");
        Ok(added.hash)
    }

    /// Fetch via the local daemon's `/api/v0/cat`.
    pub async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/v0/cat?arg={cid}", self.config.api_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.config.api_timeout)
            .send()
            .await
            .map_err(|e| SecretsError::NetworkUnavailable(format!("ipfs cat: {e}")))?;
        if !response.status().is_success() {
            return Err(SecretsError::NetworkUnavailable(format!(
                "ipfs cat returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SecretsError::NetworkUnavailable(format!("ipfs cat body: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Try each public gateway in order; first success wins.
    pub async fn fetch_from_gateways(&self, cid: &str) -> Result<Vec<u8>> {
        for gateway in &self.config.gateways {
            let url = format!("{gateway}{cid}");
            match self
                .http
                .get(&url)
                .timeout(self.config.gateway_timeout)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(bytes) => {
                        debug!(gateway = %gateway, cid, "bundle fetched from gateway");
                        return Ok(bytes.to_vec());
                    }
                    Err(e) => warn!(gateway = %gateway, error = %e, "gateway body read failed"),
                },
                Ok(response) => {
                    warn!(gateway = %gateway, status = %response.status(), "gateway refused cid")
                }
                Err(e) => warn!(gateway = %gateway, error = %e, "gateway unreachable"),
            }
        }
        Err(SecretsError::NetworkUnavailable(format!(
            "no gateway could serve {cid}"
        )))
    }
}

impl Default for IpfsClient {
    fn default() -> Self {
        Self::new(IpfsConfig::default())
    }
}
