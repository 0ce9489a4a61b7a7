//! Outbound requests and their final responses
//!
//! An `OutboundRequest` is immutable once built. The first dispatch and the
//! replay are both built from it and differ only in the `Authorization`
//! header.

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::classify::{ResponseClass, classify_status};
use crate::error::{Error, Result};

/// Which dispatch of a logical request this is.
///
/// A request starts as `First`. A 401 on `First` advances it to `Replayed`
/// before the refresh, and a 401 on `Replayed` is final. There is no third
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Replayed,
}

impl Attempt {
    /// The attempt that may follow an authorization failure on this one.
    pub fn next(self) -> Option<Attempt> {
        match self {
            Attempt::First => Some(Attempt::Replayed),
            Attempt::Replayed => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Attempt::First => "first",
            Attempt::Replayed => "replayed",
        }
    }
}

/// A single logical API call, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header. `Authorization` is accepted but always replaced by the
    /// client's own bearer token at dispatch.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRequest(format!("serializing request body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Use raw bytes as the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// The final outcome of `send`: whatever the last dispatch returned.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    attempt: Attempt,
}

impl ApiResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes, attempt: Attempt) -> Self {
        Self {
            status,
            headers,
            body,
            attempt,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether this response came from the first dispatch or the replay.
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn class(&self) -> ResponseClass {
        classify_status(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.class() == ResponseClass::Success
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON regardless of status.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Turn a non-success status into an error carrying the body.
    pub fn error_for_status(self) -> Result<Self> {
        match self.class() {
            ResponseClass::Success => Ok(self),
            ResponseClass::Unauthorized => Err(Error::Unauthorized { body: self.text() }),
            ResponseClass::ClientError | ResponseClass::ServerError => Err(Error::Status {
                status: self.status,
                body: self.text(),
            }),
        }
    }
}
