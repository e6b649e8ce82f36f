//! HTTP execution
//!
//! Builds a per-run reqwest client from the host preferences, assembles the
//! wire request from the fully-interpolated definition, and performs the
//! call with the response body streamed straight to the run's artifact file.
//! Both the send and the body stream are raced against the run's
//! cancellation token; cancelling aborts the transport, it never just
//! ignores the result.

pub mod cookies;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::collection::{RequestBodyDef, RequestDef};
use crate::config::Preferences;
use crate::errors::{EngineError, Result};

/// A fully resolved request, ready for transmission
#[derive(Debug, Clone, Serialize)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// The completed response; the body lives on disk at `body_path`
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body_path: PathBuf,
    pub size: u64,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Classification of the response body for host viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewType {
    Json,
    Html,
    Xml,
    Image,
    Pdf,
    Audio,
    Video,
    Text,
    Binary,
}

/// Determine the preview type from the Content-Type header.
pub fn determine_preview_type(content_type: Option<&str>) -> PreviewType {
    let Some(raw) = content_type else {
        return PreviewType::Binary;
    };
    let Ok(parsed) = raw.parse::<mime::Mime>() else {
        return PreviewType::Binary;
    };

    if parsed.subtype() == mime::JSON || parsed.suffix() == Some(mime::JSON) {
        return PreviewType::Json;
    }
    if parsed.subtype() == mime::XML || parsed.suffix() == Some(mime::XML) {
        return PreviewType::Xml;
    }
    match (parsed.type_(), parsed.subtype()) {
        (mime::TEXT, mime::HTML) => PreviewType::Html,
        (mime::IMAGE, _) => PreviewType::Image,
        (mime::AUDIO, _) => PreviewType::Audio,
        (mime::VIDEO, _) => PreviewType::Video,
        (mime::APPLICATION, mime::PDF) => PreviewType::Pdf,
        (mime::TEXT, _) => PreviewType::Text,
        _ => PreviewType::Binary,
    }
}

/// Build the per-run client from host preferences with the shared cookie
/// jar installed as the cookie provider.
pub fn build_client(prefs: &Preferences, jar: &Arc<Jar>) -> Result<reqwest::Client> {
    let redirect = if prefs.follow_redirects {
        reqwest::redirect::Policy::limited(prefs.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .timeout(prefs.request_timeout)
        .redirect(redirect)
        .cookie_provider(jar.clone())
        // Ambient proxy environment variables must not reroute runs.
        .no_proxy();

    if !prefs.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Assemble the wire request from an interpolated definition plus the
/// resolved Authorization header, if any.
pub fn build_request_spec(
    request: &RequestDef,
    authorization: Option<String>,
) -> Result<HttpRequestSpec> {
    let mut url = url::Url::parse(request.url.trim())?;

    let enabled_params: Vec<_> = request
        .params
        .iter()
        .filter(|param| param.enabled && !param.name.is_empty())
        .collect();
    if !enabled_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for param in enabled_params {
            pairs.append_pair(&param.name, &param.value);
        }
    }

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .filter(|header| header.enabled && !header.name.is_empty())
        .map(|header| (header.name.clone(), header.value.clone()))
        .collect();

    let (body, implied_content_type) = match &request.body {
        RequestBodyDef::None => (None, None),
        RequestBodyDef::Text { content } => (Some(content.clone()), Some("text/plain")),
        RequestBodyDef::Json { content } => (Some(content.clone()), Some("application/json")),
        RequestBodyDef::Xml { content } => (Some(content.clone()), Some("application/xml")),
        RequestBodyDef::FormUrlEncoded { fields } => {
            let pairs: Vec<(String, String)> = fields
                .iter()
                .filter(|field| field.enabled)
                .map(|field| (field.name.clone(), field.value.clone()))
                .collect();
            let encoded = serde_urlencoded::to_string(pairs)
                .map_err(|e| EngineError::Config(format!("Invalid form body: {e}")))?;
            (Some(encoded), Some("application/x-www-form-urlencoded"))
        }
    };

    if let Some(content_type) = implied_content_type {
        let present = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !present {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }
    }

    if let Some(value) = authorization {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        headers.push(("authorization".to_string(), value));
    }

    let method = request.method.trim().to_uppercase();

    Ok(HttpRequestSpec {
        method: if method.is_empty() { "GET".to_string() } else { method },
        url: url.to_string(),
        headers,
        body,
    })
}

/// Perform the call, streaming the body to `body_path`.
///
/// Network failures map to [`EngineError::Network`]; observing the
/// cancellation token maps to [`EngineError::Cancelled`] and drops the
/// in-flight transfer.
pub async fn send_request(
    client: &reqwest::Client,
    spec: &HttpRequestSpec,
    cancel: &CancellationToken,
    body_path: &Path,
) -> Result<HttpResponse> {
    let method = Method::from_bytes(spec.method.as_bytes())
        .map_err(|_| EngineError::Config(format!("Invalid HTTP method: {}", spec.method)))?;

    let mut header_map = HeaderMap::new();
    for (name, value) in &spec.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| EngineError::Config(format!("Invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| EngineError::Config(format!("Invalid value for header {name}")))?;
        header_map.append(name, value);
    }

    let mut builder = client.request(method, &spec.url).headers(header_map);
    if let Some(body) = &spec.body {
        builder = builder.body(body.clone());
    }

    let started = Instant::now();
    tracing::debug!(method = %spec.method, url = %spec.url, "sending request");

    let response = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(EngineError::Cancelled("while sending request".to_string()));
        }
        result = builder.send() => result.map_err(classify_network_error)?,
    };

    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    if let Some(parent) = body_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(body_path).await?;
    let mut stream = response.bytes_stream();
    let mut size: u64 = 0;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(EngineError::Cancelled("while reading response body".to_string()));
            }
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                size += bytes.len() as u64;
                file.write_all(&bytes).await?;
            }
            Some(Err(e)) => return Err(classify_network_error(e)),
            None => break,
        }
    }
    file.flush().await?;

    let elapsed = started.elapsed();
    tracing::debug!(status = status.as_u16(), size, ?elapsed, "response persisted");

    Ok(HttpResponse {
        status: status.as_u16(),
        status_text,
        headers,
        body_path: body_path.to_path_buf(),
        size,
        elapsed,
    })
}

fn classify_network_error(error: reqwest::Error) -> EngineError {
    if error.is_timeout() {
        EngineError::Network(format!("Request timed out: {error}"))
    } else if error.is_connect() {
        EngineError::Network(format!("Connection failed: {error}"))
    } else {
        EngineError::Network(error.to_string())
    }
}
