use std::path::PathBuf;

use derive_more::From;

use crate::resolve::ResolveError;

/// Configuration errors.
///
/// These are raised while resolving the harness configuration and abort the
/// process before any scenario runs.
#[derive(Debug, From)]
pub enum ConfigError {
    /// The settings file could not be deserialized.
    #[from]
    DeserializationFailed(toml::de::Error),

    /// A file named by an option could not be read.
    #[from(ignore)]
    UnreadableFile(PathBuf, std::io::Error),

    /// A file named by an option does not exist.
    #[from(ignore)]
    MissingFile(&'static str, PathBuf),

    /// A URL option failed to parse.
    #[from(ignore)]
    InvalidUrl(&'static str, String, url::ParseError),

    /// A URL option uses a scheme other than http or https.
    #[from(ignore)]
    UnsupportedScheme(&'static str, String),

    /// A URL option carries no host.
    #[from(ignore)]
    MissingHost(&'static str, String),

    /// The `--resolve` entry is not of the form `host:port:addr[,addr]`.
    #[from(ignore)]
    InvalidResolve(String),

    /// A trust-root file holds no certificates.
    #[from(ignore)]
    NoCertificates(PathBuf),

    /// A trust-root file holds certificates rustls rejected.
    #[from(ignore)]
    InvalidCertificate(PathBuf, String),

    /// Building the rustls client configuration failed.
    #[from(ignore)]
    Tls(rustls::Error),

    /// The log level is not one of trace, debug, info, warn or error.
    #[from(ignore)]
    InvalidLogLevel(String),

    /// The executable path could not be determined for the default upload file.
    #[from(ignore)]
    NoUploadFile(std::io::Error),
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeserializationFailed(err) => write!(f, "invalid settings file: {err}"),
            Self::UnreadableFile(path, err) => {
                write!(f, "failed to read {}: {err}", path.display())
            }
            Self::MissingFile(option, path) => {
                write!(f, "--{option}: no such file {}", path.display())
            }
            Self::InvalidUrl(option, value, err) => {
                write!(f, "--{option}: malformed url {value:?}: {err}")
            }
            Self::UnsupportedScheme(option, value) => {
                write!(f, "--{option}: only http and https are supported, got {value:?}")
            }
            Self::MissingHost(option, value) => {
                write!(f, "--{option}: url {value:?} has no host")
            }
            Self::InvalidResolve(value) => write!(
                f,
                "--resolve: expected host:port:addr[,addr], got {value:?}"
            ),
            Self::NoCertificates(path) => {
                write!(f, "no certificates found in {}", path.display())
            }
            Self::InvalidCertificate(path, reason) => {
                write!(f, "invalid certificate in {}: {reason}", path.display())
            }
            Self::Tls(err) => write!(f, "tls configuration failed: {err}"),
            Self::InvalidLogLevel(value) => write!(f, "--log-level: unknown level {value:?}"),
            Self::NoUploadFile(err) => {
                write!(f, "no --upload-file given and the executable path is unknown: {err}")
            }
        }
    }
}

/// Session errors.
///
/// These occur while a [`crate::session::ClientSession`] prepares or performs a
/// request and fail only the scenario in progress.
#[derive(Debug, From)]
pub enum SessionError {
    /// `perform` was called before a URL was set.
    NoUrl,

    /// The routing URL could not be built.
    #[from(ignore)]
    InvalidUrl(String),

    /// The request-target is not a valid URI.
    #[from(ignore)]
    InvalidRequestTarget(String),

    /// A header line is not of the form `Name: value`.
    #[from(ignore)]
    InvalidHeader(String),

    /// The host is not usable as a TLS server name.
    #[from(ignore)]
    InvalidServerName(String),

    /// Host name resolution failed.
    #[from]
    Resolve(ResolveError),

    /// The TCP connection could not be established.
    #[from(ignore)]
    Connect(String, std::io::Error),

    /// The TLS handshake failed.
    #[from(ignore)]
    Tls(String, std::io::Error),

    /// The proxy answered CONNECT with a non-success status.
    #[from(ignore)]
    TunnelRefused(String, http::StatusCode),

    /// The upload source could not be opened.
    #[from(ignore)]
    Upload(PathBuf, std::io::Error),

    /// The session runtime could not be created.
    #[from(ignore)]
    Runtime(std::io::Error),

    /// HTTP protocol failure reported by hyper.
    #[from]
    Http(hyper::Error),

    /// The request could not be assembled.
    #[from]
    Request(http::Error),
}

impl std::error::Error for SessionError {}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoUrl => write!(f, "no url set before perform"),
            Self::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            Self::InvalidRequestTarget(target) => {
                write!(f, "invalid request-target: {target:?}")
            }
            Self::InvalidHeader(line) => write!(f, "invalid header line: {line:?}"),
            Self::InvalidServerName(host) => write!(f, "invalid tls server name: {host}"),
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Connect(addr, err) => write!(f, "failed to connect to {addr}: {err}"),
            Self::Tls(addr, err) => write!(f, "tls handshake with {addr} failed: {err}"),
            Self::TunnelRefused(addr, status) => {
                write!(f, "proxy refused CONNECT {addr}: {status}")
            }
            Self::Upload(path, err) => {
                write!(f, "failed to open upload file {}: {err}", path.display())
            }
            Self::Runtime(err) => write!(f, "failed to create session runtime: {err}"),
            Self::Http(err) => write!(f, "http failure: {err}"),
            Self::Request(err) => write!(f, "failed to build request: {err}"),
        }
    }
}
