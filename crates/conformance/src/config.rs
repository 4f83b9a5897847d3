//! Harness configuration: the command line, the optional TOML settings file
//! and the resolved, read-only [`HarnessConfig`].

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use url::Url;

use crate::errors::ConfigError;
use crate::proxy::{ProxyEndpoint, ProxyMode};
use crate::resolve::ResolveOverride;
use crate::tls::TlsProfiles;

pub const DEFAULT_SITE: &str = "http://httpbin.org";
pub const DEFAULT_LOG_LEVEL: Level = Level::WARN;

pub fn register(command: clap::Command) -> clap::Command {
    command
        .arg(
            clap::Arg::new("proxy")
                .long("proxy")
                .short('x')
                .help("route requests through this proxy URL")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            clap::Arg::new("site")
                .long("site")
                .short('T')
                .help("base URL of the httpbin-compatible target")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            clap::Arg::new("ca-cert")
                .long("ca-cert")
                .help("PEM bundle used to validate the target certificate")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("proxy-ca-cert")
                .long("proxy-ca-cert")
                .help("PEM bundle used to validate the proxy certificate")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("resolve")
                .long("resolve")
                .help("host:port:addr[,addr] override bypassing DNS")
                .action(clap::ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            clap::Arg::new("request-target-prefix")
                .long("request-target-prefix")
                .help("literal prefix prepended to the request-target on the wire")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            clap::Arg::new("no-auth")
                .long("no-auth")
                .help("skip the authenticated basic-auth requests")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("proxy-tunnel")
                .long("proxy-tunnel")
                .help("tunnel through the proxy with CONNECT")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("proxy-masque")
                .long("proxy-masque")
                .help("send requests to the proxy's masque well-known URI")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("upload-file")
                .long("upload-file")
                .help("file streamed by the upload scenarios [default: this executable]")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("config")
                .long("config")
                .help("TOML settings file, overridden by command-line flags")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("log-level")
                .long("log-level")
                .help("diagnostic log level on stderr [default: warn]")
                .action(clap::ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
}

#[must_use]
pub fn command() -> clap::Command {
    register(
        clap::Command::new("ewe_conformance")
            .about("Runs an httpbin conformance battery, directly or through a proxy")
            .after_help(
                "Every other argument (filters, --list, --exact, ...) is passed to the scenario runner.",
            ),
    )
}

/// Separates the flags `command` knows from the arguments meant for the
/// scenario runner, wherever they appear. The program name stays with the
/// harness and everything after a bare `--` goes to the runner.
#[must_use]
pub fn split_args<I, S>(command: &clap::Command, args: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut own: Vec<String> = args.next().into_iter().collect();
    let mut rest = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--" {
            rest.extend(args.by_ref());
            break;
        }

        match harness_flag(command, &arg) {
            Some(value_follows) => {
                own.push(arg);
                if value_follows {
                    own.extend(args.next());
                }
            }
            None => rest.push(arg),
        }
    }

    (own, rest)
}

// Some(true) when `arg` is a flag of `command` whose value is the next argument.
fn harness_flag(command: &clap::Command, arg: &str) -> Option<bool> {
    if matches!(arg, "-h" | "--help") {
        return Some(false);
    }

    let (found, inline_value) = if let Some(long) = arg.strip_prefix("--") {
        let (name, value) = long
            .split_once('=')
            .map_or((long, None), |(name, value)| (name, Some(value)));
        let found = command
            .get_arguments()
            .find(|candidate| candidate.get_long() == Some(name));
        (found, value.is_some())
    } else if let Some(short) = arg.strip_prefix('-') {
        let mut chars = short.chars();
        let flag = chars.next()?;
        let found = command
            .get_arguments()
            .find(|candidate| candidate.get_short() == Some(flag));
        (found, !chars.as_str().is_empty())
    } else {
        return None;
    };

    let takes_value = found?.get_action().takes_values();
    if inline_value && !takes_value {
        return None;
    }

    Some(takes_value && !inline_value)
}

/// Unresolved harness settings. Every field is optional so that command-line
/// values can be layered over a settings file; tests build these directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    pub site: Option<String>,
    pub proxy: Option<String>,
    pub ca_cert: Option<PathBuf>,
    pub proxy_ca_cert: Option<PathBuf>,
    pub resolve: Option<Vec<String>>,
    pub request_target_prefix: Option<String>,
    pub no_auth: Option<bool>,
    pub proxy_tunnel: Option<bool>,
    pub proxy_masque: Option<bool>,
    pub upload_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl HarnessSettings {
    /// # Errors
    ///
    /// Fails when the file cannot be read or holds unknown or mistyped keys.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::UnreadableFile(path.to_path_buf(), err))?;
        Ok(toml::from_str(&content)?)
    }

    /// Settings given explicitly on the command line. Unset switches stay
    /// `None` so they do not mask the settings file.
    #[must_use]
    pub fn from_matches(matches: &clap::ArgMatches) -> Self {
        let switch = |id: &str| matches.get_flag(id).then_some(true);

        Self {
            site: matches.get_one::<String>("site").cloned(),
            proxy: matches.get_one::<String>("proxy").cloned(),
            ca_cert: matches.get_one::<PathBuf>("ca-cert").cloned(),
            proxy_ca_cert: matches.get_one::<PathBuf>("proxy-ca-cert").cloned(),
            resolve: matches
                .get_many::<String>("resolve")
                .map(|values| values.cloned().collect()),
            request_target_prefix: matches.get_one::<String>("request-target-prefix").cloned(),
            no_auth: switch("no-auth"),
            proxy_tunnel: switch("proxy-tunnel"),
            proxy_masque: switch("proxy-masque"),
            upload_file: matches.get_one::<PathBuf>("upload-file").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
        }
    }

    /// The command-line settings layered over `--config`, when given.
    ///
    /// # Errors
    ///
    /// See [`HarnessSettings::from_path`].
    pub fn resolve(matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        let cli = Self::from_matches(matches);

        match matches.get_one::<PathBuf>("config") {
            Some(path) => Ok(cli.layered_over(Self::from_path(path)?)),
            None => Ok(cli),
        }
    }

    /// The diagnostic log level, known before anything else is validated so
    /// logging can start first.
    ///
    /// # Errors
    ///
    /// Fails for names other than trace, debug, info, warn and error.
    pub fn log_level(&self) -> Result<Level, ConfigError> {
        match &self.log_level {
            Some(level) => {
                Level::from_str(level).map_err(|_| ConfigError::InvalidLogLevel(level.clone()))
            }
            None => Ok(DEFAULT_LOG_LEVEL),
        }
    }

    /// Fills every unset field of `self` from `base`.
    #[must_use]
    pub fn layered_over(self, base: Self) -> Self {
        Self {
            site: self.site.or(base.site),
            proxy: self.proxy.or(base.proxy),
            ca_cert: self.ca_cert.or(base.ca_cert),
            proxy_ca_cert: self.proxy_ca_cert.or(base.proxy_ca_cert),
            resolve: self.resolve.or(base.resolve),
            request_target_prefix: self.request_target_prefix.or(base.request_target_prefix),
            no_auth: self.no_auth.or(base.no_auth),
            proxy_tunnel: self.proxy_tunnel.or(base.proxy_tunnel),
            proxy_masque: self.proxy_masque.or(base.proxy_masque),
            upload_file: self.upload_file.or(base.upload_file),
            log_level: self.log_level.or(base.log_level),
        }
    }

    /// Validates the settings and applies the built-in defaults.
    ///
    /// # Errors
    ///
    /// Any malformed value, missing file or unusable trust root.
    pub fn into_config(self) -> Result<HarnessConfig, ConfigError> {
        let log_level = self.log_level()?;
        let site = parse_site(self.site.as_deref().unwrap_or(DEFAULT_SITE))?;

        let proxy = self.proxy.as_deref().map(ProxyEndpoint::parse).transpose()?;
        let proxy = ProxyMode::select(
            proxy,
            self.proxy_tunnel.unwrap_or(false),
            self.proxy_masque.unwrap_or(false),
        );

        let resolve = self
            .resolve
            .unwrap_or_default()
            .iter()
            .map(|entry| ResolveOverride::from_str(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let upload_file = match self.upload_file {
            Some(path) => path,
            None => std::env::current_exe().map_err(ConfigError::NoUploadFile)?,
        };
        if !upload_file.is_file() {
            return Err(ConfigError::MissingFile("upload-file", upload_file));
        }

        let tls = TlsProfiles::load(self.ca_cert.as_deref(), self.proxy_ca_cert.as_deref())?;

        Ok(HarnessConfig {
            site,
            proxy,
            resolve,
            request_target_prefix: self.request_target_prefix,
            no_auth: self.no_auth.unwrap_or(false),
            upload_file,
            log_level,
            tls,
        })
    }
}

/// The resolved configuration shared read-only by every scenario.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    site: String,
    proxy: ProxyMode,
    resolve: Vec<ResolveOverride>,
    request_target_prefix: Option<String>,
    no_auth: bool,
    upload_file: PathBuf,
    log_level: Level,
    tls: TlsProfiles,
}

impl HarnessConfig {
    /// Resolves the command line, layered over `--config` when given.
    ///
    /// # Errors
    ///
    /// See [`HarnessSettings::into_config`].
    pub fn from_matches(matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        HarnessSettings::resolve(matches)?.into_config()
    }

    /// Base URL without a trailing slash; scenario paths are appended as is.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    #[must_use]
    pub fn proxy(&self) -> &ProxyMode {
        &self.proxy
    }

    #[must_use]
    pub fn resolve(&self) -> &[ResolveOverride] {
        &self.resolve
    }

    #[must_use]
    pub fn request_target_prefix(&self) -> Option<&str> {
        self.request_target_prefix.as_deref()
    }

    #[must_use]
    pub fn no_auth(&self) -> bool {
        self.no_auth
    }

    #[must_use]
    pub fn upload_file(&self) -> &Path {
        &self.upload_file
    }

    #[must_use]
    pub fn log_level(&self) -> Level {
        self.log_level
    }

    #[must_use]
    pub fn tls(&self) -> &TlsProfiles {
        &self.tls
    }
}

fn parse_site(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::InvalidUrl("site", raw.into(), err))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme("site", raw.into()));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::MissingHost("site", raw.into()));
    }

    Ok(raw.trim_end_matches('/').to_string())
}
