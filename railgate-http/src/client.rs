use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use railgate::Rail;
use reqwest::{Client, RequestBuilder};
use std::fmt::Display;
use std::time::Duration;
use tracing::{Span, instrument};
use url::Url;

use crate::error::RestClientError;

/// JSON client bound to one upstream base URL.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct RestClient {
    /// Rail this client serves, recorded on every span.
    rail: Rail,
    /// Base URL, always ending in `/`.
    base_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Headers sent with each request
    headers: HeaderMap,
    /// Per-request timeout
    timeout: Option<Duration>,
}

impl RestClient {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Creates a client for `base_url`.
    ///
    /// The URL is normalized to end in a single `/` so endpoint paths
    /// resolve beneath it rather than replacing its last segment.
    ///
    /// # Errors
    ///
    /// Returns [`RestClientError::UrlParse`] for a malformed URL.
    pub fn try_new(rail: Rail, base_url: &str) -> Result<Self, RestClientError> {
        let mut normalized = base_url.trim().trim_end_matches('/').to_owned();
        normalized.push('/');
        let base_url = Url::parse(&normalized).map_err(|source| RestClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Ok(Self {
            rail,
            base_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: Some(Self::DEFAULT_TIMEOUT),
        })
    }

    /// Rail served by this client.
    #[must_use]
    pub const fn rail(&self) -> Rail {
        self.rail
    }

    /// The normalized base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Headers sent with each request.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Adds a header to every request. Names are case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`RestClientError::InvalidHeader`] when the name or value
    /// cannot be encoded.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, RestClientError> {
        let invalid = |reason: &dyn Display| RestClientError::InvalidHeader {
            name: name.to_owned(),
            reason: reason.to_string(),
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
        let mut header_value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
        header_value.set_sensitive(true);
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves `path` beneath the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`RestClientError::UrlParse`] for an unresolvable path.
    pub fn url(&self, path: &str) -> Result<Url, RestClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| RestClientError::UrlParse {
                context: "Failed to construct endpoint URL",
                source,
            })
    }

    /// Resolves `path` and appends query pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RestClientError::UrlParse`] for an unresolvable path.
    pub fn url_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, RestClientError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// `GET` returning JSON.
    ///
    /// # Errors
    ///
    /// Transport, status, and decoding failures.
    pub async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, RestClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let request = self.request(Method::GET, url);
        self.send_json(request, context).await
    }

    /// `POST` with a JSON body, returning JSON.
    ///
    /// # Errors
    ///
    /// Transport, status, and decoding failures.
    pub async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, RestClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let request = self.request(Method::POST, url).json(payload);
        self.send_json(request, context).await
    }

    /// `GET` returning the body as text (plain-text explorer endpoints).
    ///
    /// # Errors
    ///
    /// Transport and status failures.
    pub async fn get_text(&self, url: &Url, context: &'static str) -> Result<String, RestClientError> {
        let request = self.request(Method::GET, url);
        self.send_text(request, context).await
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let mut req = self.client.request(method, url.clone());
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }

    #[instrument(
        name = "railgate.http.json",
        skip_all,
        fields(
            rail = %self.rail,
            context = context,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty
        )
    )]
    async fn send_json<R>(&self, request: RequestBuilder, context: &'static str) -> Result<R, RestClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let result = match Self::checked(request, context).await {
            Ok(response) => response
                .json::<R>()
                .await
                .map_err(|source| RestClientError::JsonDeserialization { context, source }),
            Err(err) => Err(err),
        };
        record_result_on_span(&result);
        result
    }

    #[instrument(
        name = "railgate.http.text",
        skip_all,
        fields(
            rail = %self.rail,
            context = context,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty
        )
    )]
    async fn send_text(&self, request: RequestBuilder, context: &'static str) -> Result<String, RestClientError> {
        let result = match Self::checked(request, context).await {
            Ok(response) => response
                .text()
                .await
                .map_err(|source| RestClientError::ResponseBodyRead { context, source }),
            Err(err) => Err(err),
        };
        record_result_on_span(&result);
        result
    }

    async fn checked(request: RequestBuilder, context: &'static str) -> Result<reqwest::Response, RestClientError> {
        let response = request
            .send()
            .await
            .map_err(|source| RestClientError::Http { context, source })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .map_err(|source| RestClientError::ResponseBodyRead { context, source })?;
        Err(RestClientError::HttpStatus {
            context,
            status,
            body,
        })
    }
}

/// Records the outcome of a request on the current span.
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::warn!(error = %err, "upstream request failed");
        }
    }
}
