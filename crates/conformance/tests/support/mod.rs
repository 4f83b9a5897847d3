//! Local stand-ins for the remote services the battery talks to: an
//! httpbin-compatible server (masque-aware) and a forward/CONNECT proxy,
//! each served over plain TCP or TLS with a self-signed `localhost` cert.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, EXPECT, HOST, PROXY_AUTHORIZATION,
    TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body::{Body, Frame};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use ewe_conformance::proxy::MASQUE_HTTP_PATH;

type StubBody = BoxBody<Bytes, hyper::Error>;

pub fn upload_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
}

pub fn basic(user: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {token}")
}

/// A self-signed certificate for `localhost`, its PEM written to a scratch
/// file for `ca_cert`/`proxy_ca_cert`.
pub struct TestCert {
    pem: PathBuf,
    acceptor: TlsAcceptor,
}

impl TestCert {
    pub fn localhost(name: &str) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .expect("should generate certificate");

        let pem = std::env::temp_dir().join(format!(
            "ewe_conformance_{}_{name}.pem",
            std::process::id()
        ));
        std::fs::write(&pem, cert.cert.pem()).expect("should write certificate");

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der()));
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("should support default versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .expect("should accept certificate");
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Self {
            pem,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        }
    }

    pub fn pem(&self) -> &Path {
        &self.pem
    }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pem);
    }
}

/// One request as seen by a stub.
#[derive(Debug, Clone)]
pub struct Observation {
    pub method: Method,
    pub target: String,
    pub route: String,
    pub host: Option<String>,
    pub authorization: Option<String>,
    pub proxy_authorization: Option<String>,
    pub expect: Option<String>,
    pub transfer_encoding: Option<String>,
    pub content_length: Option<String>,
    pub content_type: Option<String>,
    pub body_len: usize,
}

impl Observation {
    fn new(parts: &Parts, route: String, body_len: usize) -> Self {
        let header = |name| {
            parts
                .headers
                .get(name)
                .and_then(|value: &http::HeaderValue| value.to_str().ok())
                .map(ToString::to_string)
        };

        Self {
            method: parts.method.clone(),
            target: parts.uri.to_string(),
            route,
            host: header(HOST),
            authorization: header(AUTHORIZATION),
            proxy_authorization: header(PROXY_AUTHORIZATION),
            expect: header(EXPECT),
            transfer_encoding: header(TRANSFER_ENCODING),
            content_length: header(CONTENT_LENGTH),
            content_type: header(CONTENT_TYPE),
            body_len,
        }
    }
}

#[derive(Default)]
struct Journal(Mutex<Vec<Observation>>);

impl Journal {
    fn record(&self, observation: Observation) {
        self.0.lock().expect("journal lock").push(observation);
    }

    fn snapshot(&self) -> Vec<Observation> {
        self.0.lock().expect("journal lock").clone()
    }
}

fn empty() -> StubBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> StubBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn status(status: StatusCode) -> Response<StubBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = status;
    response
}

fn json(body: String) -> Response<StubBody> {
    let mut response = Response::new(full(body));
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Newline-delimited JSON, one frame per line and no declared length, so
/// the server answers chunked.
struct Lines(std::vec::IntoIter<Bytes>);

impl Body for Lines {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.0.next().map(|line| Ok(Frame::data(line))))
    }
}

/// Runs an accept loop on a runtime owned by the stub, terminating TLS first
/// when `tls` is given. Dropping the stub shuts the runtime and every
/// connection down.
fn serve<F, Fut>(
    runtime: &tokio::runtime::Runtime,
    tls: Option<TlsAcceptor>,
    handler: F,
) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<StubBody>, Infallible>> + Send + 'static,
{
    let listener = runtime
        .block_on(TcpListener::bind("127.0.0.1:0"))
        .expect("should bind stub listener");
    let addr = listener.local_addr().expect("should have local addr");

    runtime.spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };

            let handler = handler.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(stream).await {
                            serve_connection(TokioIo::new(stream), handler).await;
                        }
                    }
                    None => serve_connection(TokioIo::new(stream), handler).await,
                }
            });
        }
    });

    addr
}

async fn serve_connection<I, F, Fut>(io: I, handler: F)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    F: Fn(Request<Incoming>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response<StubBody>, Infallible>> + Send + 'static,
{
    let _ = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service_fn(handler))
        .with_upgrades()
        .await;
}

/// `https://localhost:<port>` for TLS stubs, whose certificate names
/// `localhost`, and `http://<addr>` otherwise.
fn base_url(addr: SocketAddr, tls: bool) -> String {
    if tls {
        format!("https://localhost:{}", addr.port())
    } else {
        format!("http://{addr}")
    }
}

fn stub_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("should build stub runtime")
}

struct HttpbinState {
    prefix: Option<String>,
    journal: Journal,
}

/// An httpbin-compatible server. Requests to the masque well-known path are
/// served as if addressed to the encoded target, and an optional literal
/// prefix is stripped before routing.
pub struct Httpbin {
    runtime: tokio::runtime::Runtime,
    addr: SocketAddr,
    tls: bool,
    state: Arc<HttpbinState>,
}

impl Httpbin {
    pub fn start() -> Self {
        Self::launch(None, None)
    }

    pub fn with_prefix(prefix: Option<&str>) -> Self {
        Self::launch(prefix, None)
    }

    pub fn start_tls(cert: &TestCert) -> Self {
        Self::launch(None, Some(cert))
    }

    fn launch(prefix: Option<&str>, cert: Option<&TestCert>) -> Self {
        let runtime = stub_runtime();
        let state = Arc::new(HttpbinState {
            prefix: prefix.map(ToString::to_string),
            journal: Journal::default(),
        });

        let shared = Arc::clone(&state);
        let acceptor = cert.map(|cert| cert.acceptor.clone());
        let addr = serve(&runtime, acceptor, move |req| {
            httpbin(req, Arc::clone(&shared))
        });

        Self {
            runtime,
            addr,
            tls: cert.is_some(),
            state,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        base_url(self.addr, self.tls)
    }

    pub fn observed(&self) -> Vec<Observation> {
        self.state.journal.snapshot()
    }
}

async fn httpbin(
    req: Request<Incoming>,
    state: Arc<HttpbinState>,
) -> Result<Response<StubBody>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(status(StatusCode::BAD_REQUEST)),
    };

    let route = route_of(&parts.uri, state.prefix.as_deref());
    state
        .journal
        .record(Observation::new(&parts, route.clone(), body.len()));

    Ok(respond(&parts.method, &parts.headers, &route, &body).await)
}

fn route_of(uri: &Uri, prefix: Option<&str>) -> String {
    let mut path = uri.path();
    if let Some(stripped) = prefix.and_then(|prefix| path.strip_prefix(prefix)) {
        path = stripped;
    }

    if let Some(encoded) = path.strip_prefix(MASQUE_HTTP_PATH) {
        let decoded = percent_decode_str(encoded).decode_utf8_lossy();
        return match url::Url::parse(&decoded) {
            Ok(target) => target.path().to_string(),
            Err(_) => String::from("/invalid-masque-target"),
        };
    }

    path.to_string()
}

async fn respond(
    method: &Method,
    headers: &HeaderMap,
    route: &str,
    body: &Bytes,
) -> Response<StubBody> {
    let segments: Vec<&str> = route.trim_start_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["get"]) => json(format!("{{\"url\": \"{route}\"}}")),

        (_, ["delay", seconds]) => match seconds.parse::<u64>() {
            // shortened: a tenth of a second per requested second
            Ok(seconds) => {
                tokio::time::sleep(Duration::from_millis(seconds * 100)).await;
                json(format!("{{\"delayed\": {seconds}, \"received\": {}}}", body.len()))
            }
            Err(_) => status(StatusCode::BAD_REQUEST),
        },

        (&Method::GET, ["stream", count]) => match count.parse::<usize>() {
            Ok(count) => {
                let lines: Vec<Bytes> = (0..count)
                    .map(|id| Bytes::from(format!("{{\"id\": {id}, \"url\": \"{route}\"}}\n")))
                    .collect();
                Response::new(Lines(lines.into_iter()).boxed())
            }
            Err(_) => status(StatusCode::BAD_REQUEST),
        },

        (&Method::GET, ["basic-auth", user, password]) => {
            let expected = basic(user, password);
            let given = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());

            if given == Some(expected.as_str()) {
                json(format!("{{\"authenticated\": true, \"user\": \"{user}\"}}"))
            } else {
                let mut response = status(StatusCode::UNAUTHORIZED);
                response.headers_mut().insert(
                    WWW_AUTHENTICATE,
                    http::HeaderValue::from_static("Basic realm=\"Fake Realm\""),
                );
                response
            }
        }

        (&Method::GET, ["base64", data]) => {
            let engine = base64::engine::general_purpose::STANDARD;
            match engine
                .decode(data)
                .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data))
            {
                Ok(decoded) => Response::new(full(decoded)),
                Err(_) => Response::new(full("Incorrect Base64 data try: SFRUUEJJTiBpcyBhd2Vzb21l")),
            }
        }

        (&Method::POST, ["post"]) | (&Method::PUT, ["put"]) => {
            json(format!("{{\"received\": {}}}", body.len()))
        }

        (_, ["get" | "post" | "put" | "stream" | "basic-auth" | "base64", ..]) => {
            status(StatusCode::METHOD_NOT_ALLOWED)
        }

        _ => status(StatusCode::NOT_FOUND),
    }
}

struct ProxyState {
    journal: Journal,
}

/// A forwarding proxy that also honours CONNECT, recording the request line
/// and `Proxy-Authorization` of everything it relays.
pub struct Proxy {
    runtime: tokio::runtime::Runtime,
    addr: SocketAddr,
    tls: bool,
    state: Arc<ProxyState>,
}

impl Proxy {
    pub fn start() -> Self {
        Self::launch(None)
    }

    pub fn start_tls(cert: &TestCert) -> Self {
        Self::launch(Some(cert))
    }

    fn launch(cert: Option<&TestCert>) -> Self {
        let runtime = stub_runtime();
        let state = Arc::new(ProxyState {
            journal: Journal::default(),
        });

        let shared = Arc::clone(&state);
        let acceptor = cert.map(|cert| cert.acceptor.clone());
        let addr = serve(&runtime, acceptor, move |req| relay(req, Arc::clone(&shared)));

        Self {
            runtime,
            addr,
            tls: cert.is_some(),
            state,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Proxy URL, with `user:password@` embedded when given.
    pub fn url(&self, credentials: Option<(&str, &str)>) -> String {
        let url = base_url(self.addr, self.tls);
        match (credentials, url.split_once("://")) {
            (Some((user, password)), Some((scheme, rest))) => {
                format!("{scheme}://{user}:{password}@{rest}")
            }
            _ => url,
        }
    }

    pub fn observed(&self) -> Vec<Observation> {
        self.state.journal.snapshot()
    }
}

async fn relay(
    mut req: Request<Incoming>,
    state: Arc<ProxyState>,
) -> Result<Response<StubBody>, Infallible> {
    let (parts, body) = req.into_parts();
    state
        .journal
        .record(Observation::new(&parts, parts.uri.path().to_string(), 0));
    req = Request::from_parts(parts, body);

    let Some(authority) = req.uri().authority().map(ToString::to_string) else {
        return Ok(status(StatusCode::BAD_REQUEST));
    };

    if req.method() == Method::CONNECT {
        tokio::spawn(async move {
            let Ok(upgraded) = hyper::upgrade::on(req).await else {
                return;
            };
            let Ok(mut server) = TcpStream::connect(authority).await else {
                return;
            };

            let mut upgraded = TokioIo::new(upgraded);
            let _ = tokio::io::copy_bidirectional(&mut upgraded, &mut server).await;
        });

        return Ok(Response::new(empty()));
    }

    let origin_form = req
        .uri()
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str)
        .parse::<Uri>();
    match origin_form {
        Ok(uri) => *req.uri_mut() = uri,
        Err(_) => return Ok(status(StatusCode::BAD_REQUEST)),
    }
    req.headers_mut().remove(PROXY_AUTHORIZATION);

    let Ok(upstream) = TcpStream::connect(authority).await else {
        return Ok(status(StatusCode::BAD_GATEWAY));
    };

    let Ok((mut sender, connection)) =
        hyper::client::conn::http1::handshake(TokioIo::new(upstream)).await
    else {
        return Ok(status(StatusCode::BAD_GATEWAY));
    };

    tokio::spawn(async move {
        let _ = connection.await;
    });

    match sender.send_request(req).await {
        Ok(response) => Ok(response.map(BodyExt::boxed)),
        Err(_) => Ok(status(StatusCode::BAD_GATEWAY)),
    }
}
