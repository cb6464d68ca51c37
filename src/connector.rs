//! Paginated retrieval from host-listing upstreams.
//!
//! [`HttpEndpoint`] speaks the wire protocol shared by the built-in
//! providers: `POST <url>?limit=<n>&skip=<offset>` with a `Token` header,
//! answered by a JSON array of host objects.
//!
//! [`HostFetcher`] drives any [`HostSource`] page by page and regroups the
//! pages into batches of `batch_size` records:
//!
//! - a page shorter than `limit` ends the sequence, after the remaining
//!   buffer (possibly empty) has been emitted exactly once;
//! - transient failures are retried per [`RetryPolicy`] without moving the
//!   offset;
//! - any other failure ends the sequence with that error.
//!
//! # Response classification
//!
//! | Response | Result |
//! |----------|--------|
//! | transport error, HTTP 429, HTTP 5xx | [`PipelineError::TransientFetch`] |
//! | HTTP 500 with [`OFFSET_PAST_END_BODY`] | empty page |
//! | other non-2xx | [`PipelineError::UpstreamContract`] |
//! | 2xx, body not a JSON array of objects | [`PipelineError::UpstreamContract`] |

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;

use host_inventory_core::models::RawRecord;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::traits::{ClientConfig, HostSource};

/// Body the upstream sends with HTTP 500 when `skip` is past the last host.
pub const OFFSET_PAST_END_BODY: &str = "Error invalid skip/limit combo (>number of hosts)";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fails with [`PipelineError::ConfigMismatch`] unless `config` was written
/// for the connector named `slug`.
pub fn ensure_identity(slug: &str, config: &ClientConfig) -> Result<()> {
    if config.slug != slug {
        return Err(PipelineError::ConfigMismatch {
            connector: slug.to_string(),
            configured: config.slug.clone(),
        });
    }
    Ok(())
}

/// One provider endpoint.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    slug: String,
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(slug: impl Into<String>, url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            slug: slug.into(),
            url: url.into(),
            token,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn post_page(&self, limit: u64, offset: u64) -> Result<Vec<Value>> {
        let mut request = self
            .client
            .post(&self.url)
            .query(&[("limit", limit), ("skip", offset)]);
        if let Some(token) = &self.token {
            request = request.header("Token", token);
        }

        let response = request.send().await.map_err(|e| self.transient(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transient(e))?;
        classify_response(&self.slug, status, &body)
    }

    fn transient(&self, err: reqwest::Error) -> PipelineError {
        PipelineError::TransientFetch {
            slug: self.slug.clone(),
            reason: err.to_string(),
        }
    }
}

/// Turn an upstream response into a page of host payloads.
pub fn classify_response(slug: &str, status: StatusCode, body: &str) -> Result<Vec<Value>> {
    if status == StatusCode::INTERNAL_SERVER_ERROR && body.trim() == OFFSET_PAST_END_BODY {
        tracing::debug!(slug, "offset past the last host");
        return Ok(Vec::new());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(PipelineError::TransientFetch {
            slug: slug.to_string(),
            reason: format!("HTTP {status}: {}", snippet(body)),
        });
    }
    let contract = |reason: String| PipelineError::UpstreamContract {
        slug: slug.to_string(),
        reason,
    };
    if !status.is_success() {
        return Err(contract(format!("HTTP {status}: {}", snippet(body))));
    }

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| contract(format!("response is not JSON: {e}")))?;
    let Value::Array(items) = parsed else {
        return Err(contract("response is not a JSON array".to_string()));
    };
    if let Some(pos) = items.iter().position(|item| !item.is_object()) {
        return Err(contract(format!("element {pos} is not a JSON object")));
    }
    Ok(items)
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

/// Regroups pages from a [`HostSource`] into batches of [`RawRecord`]s.
pub struct HostFetcher {
    source: Arc<dyn HostSource>,
    policy: RetryPolicy,
    limit: u64,
    offset: u64,
    batch_size: usize,
    buffer: Vec<Value>,
    done: bool,
}

impl HostFetcher {
    pub fn new(
        source: Arc<dyn HostSource>,
        policy: RetryPolicy,
        limit: u64,
        offset: u64,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            policy,
            limit: limit.max(1),
            offset,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Next batch, or `None` once the final batch has been handed out.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawRecord>>> {
        while !self.done {
            let page = self.fetch_page().await?;
            let short = (page.len() as u64) < self.limit;
            tracing::debug!(
                slug = self.source.slug(),
                offset = self.offset,
                records = page.len(),
                "fetched page"
            );
            self.buffer.extend(page);

            if short {
                self.done = true;
                return Ok(Some(self.drain()));
            }
            self.offset += self.limit;
            if self.buffer.len() >= self.batch_size {
                return Ok(Some(self.drain()));
            }
        }
        Ok(None)
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<RawRecord>>> {
        stream::try_unfold(self, |mut fetcher| async move {
            Ok(fetcher.next_batch().await?.map(|batch| (batch, fetcher)))
        })
        .boxed()
    }

    async fn fetch_page(&self) -> Result<Vec<Value>> {
        let (limit, offset) = (self.limit, self.offset);
        let source = &self.source;
        self.policy
            .run(source.slug(), || source.fetch_page(limit, offset))
            .await
    }

    fn drain(&mut self) -> Vec<RawRecord> {
        let slug = self.source.slug().to_string();
        std::mem::take(&mut self.buffer)
            .into_iter()
            .map(|payload| RawRecord::new(slug.clone(), payload))
            .collect()
    }
}
