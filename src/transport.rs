//! Network seam for authenticated calls against the host application.
//!
//! Credentials are always ones captured off the host's own traffic; this
//! module never mints or refreshes them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::errors::{LensError, LensResult};

#[async_trait]
pub trait ReportTransport: Send + Sync {
    async fn get_json(&self, url: &str, credential: &str) -> LensResult<Value>;
    /// Posts an already-serialized JSON body.
    async fn post_json(&self, url: &str, credential: &str, body: &str) -> LensResult<Value>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> LensResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn decode(url: &str, response: reqwest::Response) -> LensResult<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(LensError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| LensError::transport(url, format!("invalid JSON response: {err}")))
    }
}

#[async_trait]
impl ReportTransport for HttpTransport {
    async fn get_json(&self, url: &str, credential: &str) -> LensResult<Value> {
        debug!(target: "transport", %url, "GET");
        let response = self
            .client
            .get(url)
            .bearer_auth(credential)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| LensError::transport(url, err))?;
        Self::decode(url, response).await
    }

    async fn post_json(&self, url: &str, credential: &str, body: &str) -> LensResult<Value> {
        debug!(target: "transport", %url, bytes = body.len(), "POST");
        let response = self
            .client
            .post(url)
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|err| LensError::transport(url, err))?;
        Self::decode(url, response).await
    }
}
