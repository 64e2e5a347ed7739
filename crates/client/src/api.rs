//! HTTP API client.

use crate::error::{ClientError, ClientResult};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stemwell_core::{JobId, JobStatusResponse, SubmitResponse};
use tracing::debug;

/// Error body shape returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Client for the Stemwell HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ClientResult<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => (err.code, err.message),
                Err(_) => ("unknown".to_string(), body),
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Submit audio content for separation.
    ///
    /// `name` is used for logging only; deduplication is by content.
    pub async fn submit(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<SubmitResponse> {
        debug!(name, size = bytes.len(), "submitting audio");
        let url = self.url("/v1/jobs")?;
        self.send_json(
            self.http
                .post(url)
                .header("Content-Type", content_type)
                .body(bytes),
        )
        .await
    }

    /// Get the status of a job.
    pub async fn job_status(&self, job_id: JobId) -> ClientResult<JobStatusResponse> {
        let url = self.url(&format!("/v1/jobs/{job_id}"))?;
        self.send_json(self.http.get(url)).await
    }

    /// Request cooperative cancellation of a job.
    pub async fn cancel(&self, job_id: JobId) -> ClientResult<SubmitResponse> {
        let url = self.url(&format!("/v1/jobs/{job_id}/cancel"))?;
        self.send_json(self.http.post(url)).await
    }

    /// Build the WebSocket URL for a job's progress channel.
    pub fn ws_url(&self, job_id: JobId) -> ClientResult<String> {
        let mut url = self.url(&format!("/v1/jobs/{job_id}/ws"))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Api {
                status: 0,
                code: "invalid_url".to_string(),
                message: format!("cannot derive websocket scheme for {url}"),
            })?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme() {
        let client = ApiClient::new("http://localhost:8080").unwrap();
        let job_id = JobId::new();
        let url = client.ws_url(job_id).unwrap();
        assert!(url.starts_with("ws://localhost:8080/v1/jobs/"));
        assert!(url.ends_with("/ws"));

        let client = ApiClient::new("https://stems.example.com").unwrap();
        let url = client.ws_url(job_id).unwrap();
        assert!(url.starts_with("wss://"));
    }
}
