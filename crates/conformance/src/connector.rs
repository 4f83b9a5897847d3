//! Connection establishment for a single request.
//!
//! A [`ConnectPlan`] says where the bytes go: straight to an endpoint, to a
//! proxy that receives the request as-is, or through a CONNECT tunnel opened
//! on a proxy. TLS is layered wherever the endpoint asks for it, so a TLS
//! target inside a TLS proxy tunnel nests two sessions.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HOST, PROXY_AUTHORIZATION};
use http::{HeaderValue, Method, Request};
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use crate::errors::SessionError;
use crate::resolve::Resolver;

/// Any duplex byte stream a request can be written to.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// A host and port, optionally spoken to over TLS.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: Option<Arc<ClientConfig>>) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    /// The endpoint `url` points at; `tls` is attached only for https.
    ///
    /// # Errors
    ///
    /// Fails for schemes other than http and https and for host-less URLs.
    pub fn from_url(url: &Url, tls: &Arc<ClientConfig>) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidUrl(url.to_string());

        let tls = match url.scheme() {
            "http" => None,
            "https" => Some(Arc::clone(tls)),
            _ => return Err(invalid()),
        };

        let host = bare_host(url).ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;

        Ok(Self::new(host, port, tls))
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// `host:port`, with IPv6 hosts bracketed.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl core::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.is_tls() { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority())
    }
}

/// Where a request's connection leads.
#[derive(Debug, Clone)]
pub enum ConnectPlan {
    /// Connect straight to the endpoint.
    Direct(Endpoint),

    /// Connect to the proxy, which receives the request unchanged.
    Proxy(Endpoint),

    /// Connect to the proxy and ask it to CONNECT to `target`.
    Tunnel {
        proxy: Endpoint,
        target: Endpoint,
        authorization: Option<HeaderValue>,
    },
}

impl ConnectPlan {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Proxy(_) => "proxy",
            Self::Tunnel { .. } => "tunnel",
        }
    }
}

/// Opens connections following a [`ConnectPlan`].
#[derive(Debug, Clone)]
pub struct Connector<R: Resolver> {
    resolver: R,
}

impl<R: Resolver> Connector<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Opens the stream the request will be written to.
    ///
    /// # Errors
    ///
    /// Resolution, TCP, TLS and CONNECT failures are all reported as
    /// [`SessionError`]s.
    pub async fn connect(&self, plan: &ConnectPlan) -> Result<BoxedIo, SessionError> {
        match plan {
            ConnectPlan::Direct(endpoint) | ConnectPlan::Proxy(endpoint) => {
                self.open(endpoint).await
            }
            ConnectPlan::Tunnel {
                proxy,
                target,
                authorization,
            } => {
                let proxied = self.open(proxy).await?;
                let tunneled = establish_tunnel(proxied, target, authorization.as_ref()).await?;
                ewe_trace::info!("Tunnel to {} established via {}", target, proxy);
                wrap_tls(tunneled, target).await
            }
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedIo, SessionError> {
        let stream = self.connect_tcp(endpoint).await?;
        wrap_tls(Box::new(stream), endpoint).await
    }

    async fn connect_tcp(&self, endpoint: &Endpoint) -> Result<TcpStream, SessionError> {
        let addrs = self.resolver.resolve(endpoint.host(), endpoint.port())?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    ewe_trace::debug!("Connected to {} at {}", endpoint, addr);
                    stream
                        .set_nodelay(true)
                        .map_err(|err| SessionError::Connect(endpoint.authority(), err))?;
                    return Ok(stream);
                }
                Err(err) => {
                    ewe_trace::warn!("Failed to connect to {} at {}: {}", endpoint, addr, err);
                    last_error = Some(err);
                }
            }
        }

        Err(SessionError::Connect(
            endpoint.authority(),
            last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses to try")
            }),
        ))
    }
}

async fn wrap_tls(io: BoxedIo, endpoint: &Endpoint) -> Result<BoxedIo, SessionError> {
    let Some(config) = &endpoint.tls else {
        return Ok(io);
    };

    let server_name = ServerName::try_from(endpoint.host().to_string())
        .map_err(|_| SessionError::InvalidServerName(endpoint.host().to_string()))?;

    let stream = TlsConnector::from(Arc::clone(config))
        .connect(server_name, io)
        .await
        .map_err(|err| SessionError::Tls(endpoint.authority(), err))?;

    Ok(Box::new(stream))
}

// Sends:
// ```
// CONNECT www.domain.com:443 HTTP/1.1
// Host: www.domain.com:443
// Proxy-Authorization: Basic ...
// ```
//
// and takes over the upgraded connection once the proxy answers with 2xx.
async fn establish_tunnel(
    proxied: BoxedIo,
    target: &Endpoint,
    authorization: Option<&HeaderValue>,
) -> Result<BoxedIo, SessionError> {
    let (mut request_sender, connection) = http1::Builder::new()
        .title_case_headers(true)
        .handshake::<_, Empty<Bytes>>(TokioIo::new(proxied))
        .await?;

    tokio::spawn(async move {
        if let Err(err) = connection.with_upgrades().await {
            ewe_trace::error!("Tunnel connection failed: {}", err);
        }
    });

    let authority = target.authority();
    let mut builder = Request::builder()
        .method(Method::CONNECT)
        .uri(authority.as_str())
        .header(HOST, authority.as_str());

    if let Some(value) = authorization {
        builder = builder.header(PROXY_AUTHORIZATION, value.clone());
    }

    let response = request_sender
        .send_request(builder.body(Empty::<Bytes>::new())?)
        .await?;

    if !response.status().is_success() {
        return Err(SessionError::TunnelRefused(authority, response.status()));
    }

    let upgraded = hyper::upgrade::on(response).await?;
    Ok(Box::new(TokioIo::new(upgraded)))
}

/// The URL's host without IPv6 brackets.
pub(crate) fn bare_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}
