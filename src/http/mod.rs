use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Asks PostgREST to echo the affected rows back in the response body.
const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client that authenticates every request with `api_key`, both
    /// as the `apikey` header and as a bearer token.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_builder(api_key, Client::builder())
    }

    /// Skips any proxy from the environment, for talking to local servers.
    #[cfg(test)]
    pub(crate) fn direct(api_key: &str) -> Result<Self> {
        Self::with_builder(api_key, Client::builder().no_proxy())
    }

    fn with_builder(api_key: &str, builder: ClientBuilder) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(api_key).context("invalid api key")?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).context("invalid api key")?,
        );

        let client = builder
            .timeout(Duration::from_secs(30))
            .user_agent("watchtrack/0.1.0")
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client })
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("Making GET request");
        let response = self.send(self.client.get(url), "GET").await?;
        Ok(response.json::<T>().await?)
    }

    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        debug!("Making POST request");
        let request = self
            .client
            .post(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(body);
        let response = self.send(request, "POST").await?;
        Ok(response.json::<T>().await?)
    }

    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        debug!("Making PATCH request");
        let request = self
            .client
            .patch(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(body);
        let response = self.send(request, "PATCH").await?;
        Ok(response.json::<T>().await?)
    }

    /// Deletes and returns whatever rows the server reports as removed.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn delete_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("Making DELETE request");
        let request = self.client.delete(url).header("Prefer", RETURN_REPRESENTATION);
        let response = self.send(request, "DELETE").await?;
        Ok(response.json::<T>().await?)
    }

    async fn send(&self, request: RequestBuilder, method: &str) -> Result<Response> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} failed with status: {} {}", method, status, body);
            return Err(anyhow::anyhow!("HTTP {} failed: {}", method, status));
        }

        Ok(response)
    }
}
