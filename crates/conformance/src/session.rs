//! The scenario-scoped, blocking HTTP client.
//!
//! A [`ClientSession`] behaves like a single configured client handle: set a
//! path, headers and a payload, then `perform` as often as needed. Each
//! `perform` opens a fresh connection on the session's own current-thread
//! runtime and blocks until the whole response body has been captured.
//! Dropping the session drops the runtime and every socket with it.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, EXPECT, HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use url::Url;

use crate::body::{Payload, RequestBody};
use crate::config::HarnessConfig;
use crate::connector::{BoxedIo, Connector};
use crate::errors::SessionError;
use crate::resolve::{OverrideResolver, SystemResolver};

/// Bodies above this size get `Expect: 100-continue` unless suppressed.
pub const EXPECT_100_THRESHOLD: usize = 1024 * 1024;

pub const ACCEPT_JSON: &str = "Accept: application/json";
pub const ACCEPT_HTML: &str = "Accept: text/html";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const USER_AGENT_VALUE: &str = concat!("ewe_conformance/", env!("CARGO_PKG_VERSION"));

/// One `Name: value` line of the session header list. An empty value
/// suppresses the header instead of sending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    name: HeaderName,
    value: Option<HeaderValue>,
}

impl HeaderLine {
    /// # Errors
    ///
    /// Fails for lines without a colon or with an invalid name or value.
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidHeader(line.to_string());

        let (name, value) = line.split_once(':').ok_or_else(invalid)?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;

        let value = value.trim();
        let value = if value.is_empty() {
            None
        } else {
            Some(HeaderValue::from_str(value).map_err(|_| invalid())?)
        };

        Ok(Self { name, value })
    }

    #[must_use]
    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> Option<&HeaderValue> {
        self.value.as_ref()
    }
}

/// Blocking HTTP/1.1 client configured from a [`HarnessConfig`].
pub struct ClientSession {
    config: Arc<HarnessConfig>,
    runtime: tokio::runtime::Runtime,
    connector: Connector<OverrideResolver<SystemResolver>>,
    url: Option<Url>,
    request_target: Option<String>,
    headers: Vec<HeaderLine>,
    payload: Payload,
    status: Option<StatusCode>,
    body: Vec<u8>,
}

impl ClientSession {
    /// Creates a session with `Accept: application/json` as its header list.
    ///
    /// # Errors
    ///
    /// Fails only when the session runtime cannot be created.
    pub fn open(config: Arc<HarnessConfig>) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SessionError::Runtime)?;

        let resolver = OverrideResolver::new(config.resolve().to_vec(), SystemResolver);

        Ok(Self {
            config,
            runtime,
            connector: Connector::new(resolver),
            url: None,
            request_target: None,
            headers: vec![HeaderLine::parse(ACCEPT_JSON)?],
            payload: Payload::None,
            status: None,
            body: Vec::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Points the session at `site + path`, rewritten by the proxy mode, and
    /// sets the wire request-target to `prefix + path` when a prefix is
    /// configured.
    ///
    /// # Errors
    ///
    /// Fails when the resulting URL does not parse.
    pub fn set_url_and_request_target(&mut self, path: &str) -> Result<(), SessionError> {
        let target = format!("{}{path}", self.config.site());
        let routing = self.config.proxy().routing_url(&target)?;

        self.request_target = self
            .config
            .request_target_prefix()
            .map(|prefix| format!("{prefix}{path}"));
        self.url = Some(routing);

        Ok(())
    }

    /// Replaces the header list.
    ///
    /// # Errors
    ///
    /// Fails on the first malformed line, leaving the list unchanged.
    pub fn set_headers<I, S>(&mut self, lines: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers = lines
            .into_iter()
            .map(|line| HeaderLine::parse(line.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Makes following requests POSTs of `fields`.
    pub fn set_post_fields(&mut self, fields: impl Into<Bytes>) {
        self.payload = Payload::Fields(fields.into());
    }

    /// Makes following requests PUTs streaming the file at `path`.
    pub fn set_upload_file(&mut self, path: impl Into<PathBuf>) {
        self.payload = Payload::Upload(path.into());
    }

    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The request-target that will be written on the wire.
    #[must_use]
    pub fn request_target(&self) -> Option<String> {
        match (&self.request_target, &self.url) {
            (Some(target), _) => Some(target.clone()),
            (None, Some(url)) => Some(self.config.proxy().default_request_target(url)),
            (None, None) => None,
        }
    }

    /// Status of the last completed request.
    #[must_use]
    pub fn response_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Body of the last completed request.
    #[must_use]
    pub fn response_body(&self) -> &[u8] {
        &self.body
    }

    /// `METHOD url`, for reports.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.url {
            Some(url) => format!("{} {url}", self.payload.method()),
            None => format!("{} <no url>", self.payload.method()),
        }
    }

    /// Performs one request and blocks until its body has been captured.
    ///
    /// # Errors
    ///
    /// Any connection, TLS, tunnel or protocol failure.
    pub fn perform(&mut self) -> Result<StatusCode, SessionError> {
        let routing = self.url.clone().ok_or(SessionError::NoUrl)?;
        let proxy = self.config.proxy();

        let plan = proxy.connect_plan(&routing, self.config.tls())?;
        let target = self.request_target().ok_or(SessionError::NoUrl)?;
        let uri: Uri = target
            .parse()
            .map_err(|_| SessionError::InvalidRequestTarget(target.clone()))?;
        let headers = self.request_headers(&routing)?;
        let method = self.payload.method();

        ewe_trace::info!(
            "Performing {} {} (request-target {}, proxy mode {}, via {})",
            method,
            routing,
            target,
            proxy.name(),
            plan.name()
        );

        self.status = None;
        self.body.clear();

        let Self {
            runtime,
            connector,
            payload,
            body: sink,
            ..
        } = self;

        let status = runtime.block_on(async {
            let io = connector.connect(&plan).await?;
            let body = payload.open().await?;

            let mut request = Request::builder()
                .method(method)
                .uri(uri)
                .version(Version::HTTP_11)
                .body(body)?;
            *request.headers_mut() = headers;

            send_request(io, request, sink).await
        })?;

        ewe_trace::info!("Received {} for {}", status, routing);
        self.status = Some(status);
        Ok(status)
    }

    // Header list semantics: automatic headers first, then every name in the
    // list replaces (or, with an empty value, suppresses) its automatic
    // counterpart, then the proxy mode's headers.
    fn request_headers(&self, routing: &Url) -> Result<HeaderMap, SessionError> {
        let mut headers = HeaderMap::new();

        headers.insert(HOST, host_header(routing)?);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        if let Payload::Fields(_) = self.payload {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }

        // streamed bodies have no known length and always ask first
        if self
            .payload
            .known_len()
            .is_none_or(|len| len > EXPECT_100_THRESHOLD)
        {
            headers.insert(EXPECT, HeaderValue::from_static("100-continue"));
        }

        for line in &self.headers {
            headers.remove(line.name());
        }

        for line in &self.headers {
            if let Some(value) = line.value() {
                headers.append(line.name().clone(), value.clone());
            }
        }

        for (name, value) in self.config.proxy().session_headers(routing)? {
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        ewe_trace::debug!("Closing client session for {}", self.describe());
    }
}

fn host_header(routing: &Url) -> Result<HeaderValue, SessionError> {
    let host = routing
        .host_str()
        .ok_or_else(|| SessionError::InvalidUrl(routing.to_string()))?;

    let value = match routing.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    HeaderValue::from_str(&value).map_err(|_| SessionError::InvalidHeader(format!("Host: {value}")))
}

async fn send_request(
    io: BoxedIo,
    request: Request<RequestBody>,
    sink: &mut Vec<u8>,
) -> Result<StatusCode, SessionError> {
    let (mut request_sender, connection) = http1::Builder::new()
        .title_case_headers(true)
        .handshake(TokioIo::new(io))
        .await?;

    let driver = tokio::spawn(async move {
        if let Err(err) = connection.await {
            ewe_trace::error!("Connection failed: {}", err);
        }
    });

    let response = request_sender.send_request(request).await?;
    let status = response.status();

    let mut body = response.into_body();
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            sink.extend_from_slice(&data);
        }
    }

    drop(request_sender);
    driver.abort();

    Ok(status)
}
