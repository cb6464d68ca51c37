//! Qualys host-asset connector.
//!
//! # Configuration
//!
//! ```toml
//! [fetching.sources.qualys]
//! api_token_env = "QUALYS_API_KEY"
//! limit = 1
//! target_collection = "raw_qualys"
//! # endpoint_url = "http://localhost:9000/api/qualys/hosts/get"
//! ```
//!
//! Payloads are Qualys `HostAsset` documents; see
//! [`host_inventory_core::normalize::qualys`] for how they are mapped.

use async_trait::async_trait;
use serde_json::Value;

use crate::connector::{ensure_identity, HttpEndpoint};
use crate::error::Result;
use crate::traits::{ClientConfig, HostSource};

pub const SLUG: &str = "qualys";
pub const ENDPOINT_URL: &str = "https://api.recruiting.app.silk.security/api/qualys/hosts/get";

pub struct QualysClient {
    endpoint: HttpEndpoint,
}

impl QualysClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        ensure_identity(SLUG, &config)?;
        let url = config.endpoint_url.unwrap_or_else(|| ENDPOINT_URL.to_string());
        Ok(Self {
            endpoint: HttpEndpoint::new(SLUG, url, config.api_token)?,
        })
    }
}

#[async_trait]
impl HostSource for QualysClient {
    fn slug(&self) -> &str {
        SLUG
    }

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Vec<Value>> {
        self.endpoint.post_page(limit, offset).await
    }
}
