use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::structures::{
    errors::{ApiError, ConsoleError},
    model::{Category, CheckResult, NewCategory, NewWebsite, Summary, Website},
};

/// The monitoring backend as seen by the console: four reads and three
/// commands. Persistence and probing live behind it.
#[async_trait]
pub trait MonitorApi: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>, ApiError>;

    async fn websites(&self) -> Result<Vec<Website>, ApiError>;

    async fn summary(&self) -> Result<Summary, ApiError>;

    /// Newest first.
    async fn latest_checks(&self) -> Result<Vec<CheckResult>, ApiError>;

    async fn create_category(&self, category: &NewCategory) -> Result<Category, ApiError>;

    async fn create_website(&self, website: &NewWebsite) -> Result<Website, ApiError>;

    /// Returns once the probe for `website_id` has run. The result itself is
    /// only visible through a later read of the checks.
    async fn trigger_check(&self, website_id: &str) -> Result<(), ApiError>;
}

/// `MonitorApi` over the backend's JSON HTTP interface.
#[derive(Debug, Clone)]
pub struct HttpMonitorApi {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpMonitorApi {
    pub fn new(
        client: Client,
        base_url: &str,
        api_prefix: &str,
        timeout: Duration,
    ) -> Result<Self, ConsoleError> {
        let mut url = Url::parse(base_url).map_err(|e| {
            ConsoleError::InvalidConfiguration(format!("invalid backend url {base_url:?}: {e}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ConsoleError::InvalidConfiguration(format!(
                    "backend url {base_url:?} cannot carry a path"
                ))
            })?
            .pop_if_empty()
            .extend(api_prefix.split('/').filter(|s| !s.is_empty()));
        Ok(Self {
            client,
            base_url: url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("backend answered {}: {}", status, message);
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments);
        debug!("GET {}", url);
        let response = self.send(self.client.get(url.clone())).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{url}: {e}")))
    }
}

#[async_trait]
impl MonitorApi for HttpMonitorApi {
    async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.get(&["categories"]).await
    }

    async fn websites(&self) -> Result<Vec<Website>, ApiError> {
        self.get(&["websites"]).await
    }

    async fn summary(&self) -> Result<Summary, ApiError> {
        self.get(&["summary"]).await
    }

    async fn latest_checks(&self) -> Result<Vec<CheckResult>, ApiError> {
        self.get(&["checks", "latest"]).await
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category, ApiError> {
        let url = self.endpoint(&["categories"]);
        debug!("POST {} {:?}", url, category);
        let response = self.send(self.client.post(url.clone()).json(category)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{url}: {e}")))
    }

    async fn create_website(&self, website: &NewWebsite) -> Result<Website, ApiError> {
        let url = self.endpoint(&["websites"]);
        debug!("POST {} {:?}", url, website);
        let response = self.send(self.client.post(url.clone()).json(website)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{url}: {e}")))
    }

    async fn trigger_check(&self, website_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["check", website_id]);
        debug!("POST {}", url);
        // the body is whatever the probe reported; only the status matters here
        self.send(self.client.post(url)).await.map(|_| ())
    }
}
