//! HTTP trigger requests and responses.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::Query,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, header},
};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::MessageError;

/// A fully buffered HTTP request handed to an HTTP-triggered function.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Value of a header, if present and valid text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded query string parameters.
    ///
    /// A malformed query string yields no parameters.
    #[must_use]
    pub fn query_pairs(&self) -> HashMap<String, String> {
        Query::<HashMap<String, String>>::try_from_uri(&self.uri)
            .map(|Query(pairs)| pairs)
            .unwrap_or_default()
    }

    /// Single query string parameter.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<String> {
        self.query_pairs().remove(name)
    }

    /// Body as UTF-8 text.
    ///
    /// # Errors
    /// Returns error if the body is not valid UTF-8.
    pub fn body_text(&self) -> Result<String, MessageError> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }

    /// Body decoded as JSON.
    ///
    /// # Errors
    /// Returns error if the body is not JSON matching `T`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Convert into an axum request for routing through a service.
    #[must_use]
    pub fn into_request(self) -> Request<Body> {
        let mut request = Request::new(Body::from(self.body));
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        request
    }
}

/// Builds an [`HttpRequest`].
///
/// The `Host` header is taken from the URI authority and `Content-Length`
/// is set whenever a body is present.
#[derive(Debug, Clone)]
pub struct HttpRequestBuilder {
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl HttpRequestBuilder {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it `application/json`.
    ///
    /// # Errors
    /// Returns error if `value` cannot be serialized.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, MessageError> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    /// Validate and assemble the request.
    ///
    /// # Errors
    /// Returns error on an invalid method, URI or header.
    pub fn build(self) -> Result<HttpRequest, MessageError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| MessageError::InvalidMethod(self.method.clone()))?;
        let uri: Uri = self
            .uri
            .parse()
            .map_err(|e| MessageError::InvalidUri(format!("{}: {e}", self.uri)))?;

        let mut headers = HeaderMap::new();
        if let Some(host) = uri.host() {
            let host = uri
                .port_u16()
                .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
            headers.insert(header::HOST, header_value(&host)?);
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| MessageError::InvalidHeader(format!("{name}: {e}")))?;
            headers.append(name, header_value(value)?);
        }

        let body = self.body.unwrap_or_default();
        if !body.is_empty() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        Ok(HttpRequest {
            method,
            uri,
            headers,
            body,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, MessageError> {
    HeaderValue::from_str(value).map_err(|e| MessageError::InvalidHeader(format!("{value}: {e}")))
}

/// Shorthand for a request with optional extra headers and text body.
///
/// # Errors
/// Returns error on an invalid method, URI or header.
pub fn create_http_request(
    method: &str,
    uri: &str,
    headers: Option<&HeaderMap>,
    body: Option<&str>,
) -> Result<HttpRequest, MessageError> {
    let mut builder = HttpRequestBuilder::new(method, uri);
    if let Some(body) = body {
        builder = builder.body(body.to_string());
    }
    let mut request = builder.build()?;
    if let Some(headers) = headers {
        for (name, value) in headers {
            request.headers.append(name.clone(), value.clone());
        }
    }
    Ok(request)
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Buffer an axum response.
    ///
    /// # Errors
    /// Returns error if the body stream fails.
    pub async fn from_response(response: Response<Body>) -> Result<Self, MessageError> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| MessageError::Body(e.to_string()))?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Body as UTF-8 text.
    ///
    /// # Errors
    /// Returns error if the body is not valid UTF-8.
    pub fn text(&self) -> Result<String, MessageError> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }

    /// Body decoded as JSON.
    ///
    /// # Errors
    /// Returns error if the body is not JSON matching `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_host_and_content_length() {
        let request = HttpRequestBuilder::new("post", "http://localhost:7071/api/orders?id=1000")
            .header("X-Trace", "abc")
            .body("hello")
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.header("host"), Some("localhost:7071"));
        assert_eq!(request.header("content-length"), Some("5"));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.body_text().unwrap(), "hello");
    }

    #[test]
    fn query_parameters_are_decoded() {
        let request = create_http_request(
            "GET",
            "http://localhost/api/HttpTriggerFunction?id=1000&data=hello%20world",
            None,
            None,
        )
        .unwrap();

        assert_eq!(request.query("id").as_deref(), Some("1000"));
        assert_eq!(request.query("data").as_deref(), Some("hello world"));
        assert_eq!(request.query("missing"), None);
        assert!(request.header("content-length").is_none());
    }

    #[test]
    fn invalid_parts_are_rejected() {
        assert!(matches!(
            HttpRequestBuilder::new("GET", "http://exa mple").build(),
            Err(MessageError::InvalidUri(_))
        ));
        assert!(matches!(
            HttpRequestBuilder::new("GET", "/")
                .header("bad header", "x")
                .build(),
            Err(MessageError::InvalidHeader(_))
        ));
        assert!(matches!(
            HttpRequestBuilder::new("GE T", "/").build(),
            Err(MessageError::InvalidMethod(_))
        ));
    }

    #[test]
    fn extra_headers_are_appended() {
        let mut extra = HeaderMap::new();
        extra.insert("x-correlation", HeaderValue::from_static("c-1"));
        let request =
            create_http_request("POST", "http://localhost/api", Some(&extra), Some("{}")).unwrap();

        assert_eq!(request.header("x-correlation"), Some("c-1"));
        let converted = request.into_request();
        assert_eq!(converted.uri().path(), "/api");
    }

    #[test]
    fn responses_are_buffered() {
        let response = Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Body::from(r#"{"id":"1000"}"#))
            .unwrap();

        let buffered = tokio_test::block_on(HttpResponse::from_response(response)).unwrap();
        assert_eq!(buffered.status, StatusCode::ACCEPTED);
        let body: serde_json::Value = buffered.json().unwrap();
        assert_eq!(body["id"], "1000");
    }
}
