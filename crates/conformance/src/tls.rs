//! Trust-root loading for the rustls client configurations.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::errors::ConfigError;

const HTTP11_ALPN: &[u8] = b"http/1.1";

/// The two client configurations a session may need: one validating the
/// target's certificate and one validating the proxy's.
#[derive(Debug, Clone)]
pub struct TlsProfiles {
    pub target: Arc<ClientConfig>,
    pub proxy: Arc<ClientConfig>,
}

impl TlsProfiles {
    /// Builds both profiles, reading the given CA bundles.
    ///
    /// # Errors
    ///
    /// Fails when a bundle is unreadable, holds no certificates, or holds
    /// certificates rustls rejects.
    pub fn load(
        target_ca: Option<&Path>,
        proxy_ca: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            target: client_config("ca-cert", target_ca)?,
            proxy: client_config("proxy-ca-cert", proxy_ca)?,
        })
    }
}

/// Builds a client configuration trusting either the bundle at `ca_file` or
/// the webpki roots, advertising only HTTP/1.1 over ALPN.
///
/// # Errors
///
/// See [`TlsProfiles::load`].
pub fn client_config(
    option: &'static str,
    ca_file: Option<&Path>,
) -> Result<Arc<ClientConfig>, ConfigError> {
    let roots = match ca_file {
        Some(path) => load_roots(option, path)?,
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };

    let mut config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(ConfigError::Tls)?
            .with_root_certificates(roots)
            .with_no_client_auth();

    config.alpn_protocols = vec![HTTP11_ALPN.to_vec()];

    Ok(Arc::new(config))
}

fn load_roots(option: &'static str, path: &Path) -> Result<RootCertStore, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(option, path.to_path_buf()));
    }

    let pem = std::fs::read(path).map_err(|err| ConfigError::UnreadableFile(path.into(), err))?;

    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|err| ConfigError::InvalidCertificate(path.into(), err.to_string()))?;

    if certs.is_empty() {
        return Err(ConfigError::NoCertificates(path.into()));
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    ewe_trace::info!(
        "Loaded {} trust roots from {} ({} ignored)",
        added,
        path.display(),
        ignored
    );

    if added == 0 {
        return Err(ConfigError::InvalidCertificate(
            path.into(),
            format!("all {ignored} certificates were rejected"),
        ));
    }

    Ok(store)
}
