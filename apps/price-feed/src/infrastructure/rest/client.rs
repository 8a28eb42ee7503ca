//! HTTP client wrappers for the REST backends.
//!
//! A [`RestBackend`] is one base URL with its credential and default query.
//! A [`ResourceClient`] is a backend plus an endpoint path and exposes the
//! CRUD operations. Each operation issues exactly one request; there are no
//! retries at this layer.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::envelope::ResponseEnvelope;
use super::error::{ApiError, classify_transport_error, rejection};
use super::params::QueryParams;
use crate::infrastructure::config::{ApiKey, ApiSettings};
use crate::infrastructure::metrics;

/// How a backend authenticates.
#[derive(Debug, Clone)]
pub enum ApiCredential {
    /// Static key sent in a request header.
    Header {
        /// Header name.
        name: &'static str,
        /// Key value.
        key: ApiKey,
    },
    /// Static key sent as a query parameter.
    Query {
        /// Parameter name.
        param: &'static str,
        /// Key value.
        key: ApiKey,
    },
}

/// One REST backend.
#[derive(Debug, Clone)]
pub struct RestBackend {
    name: String,
    base_url: String,
    client: Client,
    credential: Option<ApiCredential>,
    default_query: QueryParams,
}

impl RestBackend {
    /// Create a backend.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unexpected` if the base URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        timeout: Duration,
        credential: Option<ApiCredential>,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ApiError::unexpected(format!("invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::unexpected(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url,
            client,
            credential,
            default_query: QueryParams::new(),
        })
    }

    /// Build the unauthenticated `api` backend serving the CRUD resources
    /// from `API_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unexpected` if the configured base URL is invalid.
    pub fn from_api_settings(settings: &ApiSettings) -> Result<Self, ApiError> {
        Self::new("api", &settings.api_base_url, settings.http_timeout, None)
    }

    /// Parameters sent with every request; per-call parameters override them.
    #[must_use]
    pub fn with_default_query(mut self, params: QueryParams) -> Self {
        self.default_query = params;
        self
    }

    /// Backend name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, id: Option<&str>) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| ApiError::unexpected(format!("invalid URL: {e}")))?;

        if let Some(id) = id {
            url.path_segments_mut()
                .map_err(|()| ApiError::unexpected("URL cannot have path segments"))?
                .pop_if_empty()
                .push(id);
        }

        Ok(url)
    }

    /// Send one request and return the status plus the raw body of a 2xx
    /// response.
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: Option<&QueryParams>,
        body: Option<serde_json::Value>,
    ) -> Result<(reqwest::StatusCode, String), ApiError> {
        let mut query = params.map_or_else(
            || self.default_query.clone(),
            |p| self.default_query.merged(p),
        );

        let path = url.path().to_string();
        let mut request = self.client.request(method.clone(), url);

        match &self.credential {
            Some(ApiCredential::Header { name, key }) => {
                request = request.header(*name, key.expose());
            }
            Some(ApiCredential::Query { param, key }) => {
                query.insert(*param, key.expose());
            }
            None => {}
        }

        if !query.is_empty() {
            request = request.query(&query.pairs());
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let started = Instant::now();
        let result = self.execute(request).await;
        let outcome = result.as_ref().map_or_else(|e| e.kind().as_str(), |_| "ok");
        metrics::record_api_request(&self.name, outcome, started.elapsed());

        match &result {
            Ok((status, _)) => tracing::debug!(
                backend = %self.name,
                %method,
                path = %path,
                status = status.as_u16(),
                "REST request succeeded"
            ),
            Err(e) => tracing::warn!(
                backend = %self.name,
                %method,
                path = %path,
                error = %e,
                "REST request failed"
            ),
        }

        result
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, String), ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            // The status line already arrived; a truncated body still
            // reports the upstream status.
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        Ok((status, text))
    }
}

/// Decode a 2xx body. An empty body decodes as JSON `null`.
fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text)
        .map_err(|e| ApiError::unexpected(format!("invalid response body: {e}")))
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::unexpected(format!("invalid request body: {e}")))
}

/// CRUD client for one endpoint of a backend.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use price_feed::infrastructure::rest::{QueryParams, ResourceClient, RestBackend};
///
/// async fn example() -> Result<(), price_feed::infrastructure::rest::ApiError> {
///     let backend = Arc::new(RestBackend::new(
///         "api",
///         "https://api.example.com",
///         Duration::from_secs(10),
///         None,
///     )?);
///     let users = ResourceClient::users(&backend);
///
///     let page = users
///         .list::<serde_json::Value>(&QueryParams::new().with("page", 1))
///         .await?;
///     println!("{} users", page.data.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ResourceClient {
    backend: Arc<RestBackend>,
    endpoint: String,
}

impl ResourceClient {
    /// Client for `endpoint` (e.g. `/users`) on `backend`.
    #[must_use]
    pub fn new(backend: Arc<RestBackend>, endpoint: impl Into<String>) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
        }
    }

    /// The `/users` resource.
    #[must_use]
    pub fn users(backend: &Arc<RestBackend>) -> Self {
        Self::new(Arc::clone(backend), "/users")
    }

    /// The `/products` resource.
    #[must_use]
    pub fn products(backend: &Arc<RestBackend>) -> Self {
        Self::new(Arc::clone(backend), "/products")
    }

    /// Endpoint path.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `POST {endpoint}`.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure, non-2xx status or an
    /// undecodable body.
    pub async fn create<T>(&self, data: &T) -> Result<ResponseEnvelope<T>, ApiError>
    where
        T: Serialize + DeserializeOwned + Sync,
    {
        let body = to_json(data)?;
        let url = self.backend.url(&self.endpoint, None)?;
        let (status, text) = self.backend.send(Method::POST, url, None, Some(body)).await?;
        Ok(ResponseEnvelope::new(decode_body(&text)?, status))
    }

    /// `GET {endpoint}?params`.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure, non-2xx status or an
    /// undecodable body.
    pub async fn list<T: DeserializeOwned>(
        &self,
        params: &QueryParams,
    ) -> Result<ResponseEnvelope<Vec<T>>, ApiError> {
        let url = self.backend.url(&self.endpoint, None)?;
        let (status, text) = self.backend.send(Method::GET, url, Some(params), None).await?;
        Ok(ResponseEnvelope::new(decode_body(&text)?, status))
    }

    /// `GET {endpoint}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure, non-2xx status or an
    /// undecodable body.
    pub async fn get_by_id<T: DeserializeOwned>(
        &self,
        id: impl Display,
    ) -> Result<ResponseEnvelope<T>, ApiError> {
        let url = self.backend.url(&self.endpoint, Some(&id.to_string()))?;
        let (status, text) = self.backend.send(Method::GET, url, None, None).await?;
        Ok(ResponseEnvelope::new(decode_body(&text)?, status))
    }

    /// `PUT {endpoint}/{id}` with a partial body.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure, non-2xx status or an
    /// undecodable body.
    pub async fn update<T, P>(
        &self,
        id: impl Display,
        partial: &P,
    ) -> Result<ResponseEnvelope<T>, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + Sync + ?Sized,
    {
        let body = to_json(partial)?;
        let url = self.backend.url(&self.endpoint, Some(&id.to_string()))?;
        let (status, text) = self.backend.send(Method::PUT, url, None, Some(body)).await?;
        Ok(ResponseEnvelope::new(decode_body(&text)?, status))
    }

    /// `DELETE {endpoint}/{id}`. The response body is ignored.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure or non-2xx status.
    pub async fn delete(&self, id: impl Display) -> Result<ResponseEnvelope<()>, ApiError> {
        let url = self.backend.url(&self.endpoint, Some(&id.to_string()))?;
        let (status, _) = self.backend.send(Method::DELETE, url, None, None).await?;
        Ok(ResponseEnvelope::new((), status))
    }

    /// `GET {endpoint}{subpath}?params`, for endpoints outside plain CRUD.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` on transport failure, non-2xx status or an
    /// undecodable body.
    pub async fn get_path<T: DeserializeOwned>(
        &self,
        subpath: &str,
        params: &QueryParams,
    ) -> Result<ResponseEnvelope<T>, ApiError> {
        let url = self
            .backend
            .url(&format!("{}{subpath}", self.endpoint), None)?;
        let (status, text) = self.backend.send(Method::GET, url, Some(params), None).await?;
        Ok(ResponseEnvelope::new(decode_body(&text)?, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> RestBackend {
        RestBackend::new("test", base, Duration::from_secs(1), None).unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(backend("http://localhost:8080/").base_url(), "http://localhost:8080");
    }

    #[test]
    fn invalid_base_url_is_unexpected() {
        let err = RestBackend::new("test", "not a url", Duration::from_secs(1), None).unwrap_err();
        assert!(err.to_string().starts_with("API Error: invalid base URL"));
    }

    #[test]
    fn id_is_a_single_encoded_segment() {
        let url = backend("http://localhost:8080")
            .url("/users", Some("a b/c"))
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/users/a%20b%2Fc");
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let value: Option<u32> = decode_body("").unwrap();
        assert_eq!(value, None);
        let value: serde_json::Value = decode_body("  ").unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn bad_body_is_unexpected() {
        let err = decode_body::<Vec<u32>>("{").unwrap_err();
        assert!(matches!(err, ApiError::Unexpected(_)));
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let backend = RestBackend::new(
            "cmc",
            "http://localhost:8080",
            Duration::from_secs(1),
            Some(ApiCredential::Header {
                name: "X-CMC_PRO_API_KEY",
                key: ApiKey::new("super-secret".to_string()),
            }),
        )
        .unwrap();
        assert!(!format!("{backend:?}").contains("super-secret"));
    }
}
