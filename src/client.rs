use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::{Error, Result};

/// Thin HTTP client for one fan controller.
///
/// Every request carries the same fixed timeout. Anything other than a
/// `200 OK` (including transport errors and timeouts) yields an error; there
/// are no retries here, the next poll cycle reconciles. Cloning shares the
/// underlying connection pool, so the poll task and command handling reuse
/// one transport.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
}

impl DeviceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub async fn get(&self, base_url: &str, path: &str) -> Result<String> {
        let url = format!("{base_url}{path}");
        debug!(url = %url, "getting URL");
        let response = self.http.get(&url).send().await?;
        Self::body_if_ok(response).await
    }

    pub async fn post(&self, base_url: &str, path: &str) -> Result<String> {
        let url = format!("{base_url}{path}");
        debug!(url = %url, "posting URL");
        let response = self.http.post(&url).send().await?;
        Self::body_if_ok(response).await
    }

    async fn body_if_ok(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "method failed");
            return Err(Error::NoResponse(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}
