//! REST client for the run endpoints.
//!
//! Used for hydration, for the polling fallback and for the one-shot commands
//! (cancel, delete, create). Every failure is mapped to [`ApiError`].

use std::time::Duration;

use async_trait::async_trait;
use benchdash_protocol::{
    ApiErrorBody, BulkDeleteDetails, BulkDeleteResponse, HealthResponse, ListRunsQuery,
    MessageResponse, RunCreate, RunCreated, RunDetail, RunSummary,
};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ApiError, TransportError};
use crate::session::Session;
use crate::socket::live_url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// What the view-models need from the backend.
///
/// Dropping a returned future aborts the request.
#[async_trait]
pub trait RunsApi: Send + Sync + 'static {
    async fn get_run(&self, run_id: &str) -> Result<RunDetail, ApiError>;

    async fn list_runs(&self, query: &ListRunsQuery) -> Result<Vec<RunSummary>, ApiError>;

    async fn create_run(&self, request: &RunCreate) -> Result<RunCreated, ApiError>;

    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError>;

    async fn delete_run(&self, run_id: &str) -> Result<(), ApiError>;

    /// One request for many runs. Per-run outcomes come back grouped; only a
    /// failure of the request itself is an error.
    async fn bulk_delete_runs(&self, run_ids: &[String]) -> Result<BulkDeleteDetails, ApiError>;
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    session: Session,
}

impl RestClient {
    pub fn new(base_url: Url, session: Session) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, session, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: Url,
        session: Session,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("benchdash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Live-channel URL on the same origin. The token stays in the
    /// `Authorization` header of REST calls only.
    pub fn live_url(&self, path: &str) -> Result<Url, TransportError> {
        live_url(&self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let url = self.endpoint(&["api", "health"])?;
        self.execute(self.request(Method::GET, url)).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let request = request.build().map_err(ApiError::from)?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let err = ApiError::from(e);
                warn!(
                    component = "rest",
                    event = "rest.request.failed",
                    method = %method,
                    path = %path,
                    error = %err,
                    "Request failed"
                );
                return Err(err);
            }
        };

        let status = response.status();
        debug!(
            component = "rest",
            event = "rest.response",
            method = %method,
            path = %path,
            status = status.as_u16(),
            "Response received"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = error_from_body(status, &body);
            warn!(
                component = "rest",
                event = "rest.request.rejected",
                method = %method,
                path = %path,
                status = status.as_u16(),
                error = %err,
                "Request rejected"
            );
            return Err(err);
        }

        let bytes = response.bytes().await.map_err(ApiError::from)?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RunsApi for RestClient {
    async fn get_run(&self, run_id: &str) -> Result<RunDetail, ApiError> {
        let url = self.endpoint(&["api", "runs", run_id])?;
        self.execute(self.request(Method::GET, url)).await
    }

    async fn list_runs(&self, query: &ListRunsQuery) -> Result<Vec<RunSummary>, ApiError> {
        let url = self.endpoint(&["api", "runs"])?;
        self.execute(self.request(Method::GET, url).query(query))
            .await
    }

    async fn create_run(&self, request: &RunCreate) -> Result<RunCreated, ApiError> {
        let url = self.endpoint(&["api", "runs"])?;
        self.execute(self.request(Method::POST, url).json(request))
            .await
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "runs", run_id, "cancel"])?;
        let _: MessageResponse = self.execute(self.request(Method::POST, url)).await?;
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "runs", run_id])?;
        let _: MessageResponse = self.execute(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn bulk_delete_runs(&self, run_ids: &[String]) -> Result<BulkDeleteDetails, ApiError> {
        let url = self.endpoint(&["api", "runs", "bulk-delete"])?;
        let response: BulkDeleteResponse = self
            .execute(self.request(Method::POST, url).json(run_ids))
            .await?;
        Ok(response.details)
    }
}

/// FastAPI's default error shape, used when the structured envelope is absent.
#[derive(Deserialize)]
struct DetailBody {
    detail: serde_json::Value,
}

fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        return ApiError::Status {
            status: status.as_u16(),
            code: Some(parsed.error.code),
            message: parsed.error.message,
        };
    }
    let message = match serde_json::from_str::<DetailBody>(body) {
        Ok(DetailBody {
            detail: serde_json::Value::String(text),
        }) => text,
        Ok(DetailBody { detail }) => detail.to_string(),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    ApiError::Status {
        status: status.as_u16(),
        code: None,
        message,
    }
}
