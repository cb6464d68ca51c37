//! CrowdStrike Falcon host connector.
//!
//! ```toml
//! [fetching.sources.crowdstrike]
//! api_token_env = "CROWDSTRIKE_API_KEY"
//! limit = 1
//! target_collection = "raw_crowdstrike"
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::connector::{ensure_identity, HttpEndpoint};
use crate::error::Result;
use crate::traits::{ClientConfig, HostSource};

pub const SLUG: &str = "crowdstrike";
pub const ENDPOINT_URL: &str =
    "https://api.recruiting.app.silk.security/api/crowdstrike/hosts/get";

pub struct CrowdstrikeClient {
    endpoint: HttpEndpoint,
}

impl CrowdstrikeClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        ensure_identity(SLUG, &config)?;
        let url = config.endpoint_url.unwrap_or_else(|| ENDPOINT_URL.to_string());
        Ok(Self {
            endpoint: HttpEndpoint::new(SLUG, url, config.api_token)?,
        })
    }
}

#[async_trait]
impl HostSource for CrowdstrikeClient {
    fn slug(&self) -> &str {
        SLUG
    }

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Vec<Value>> {
        self.endpoint.post_page(limit, offset).await
    }
}
