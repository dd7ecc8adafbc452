//! TLS material for the HTTPS listener.
//!
//! A certificate/key pair is taken from `TLS_CERT`/`TLS_KEY`, or from
//! `tls/certificate.pem` + `tls/private-key.pem` when present. Otherwise a
//! self-signed certificate is generated for this run. Browsers will warn about
//! it, but the connection is still encrypted.
//!
//! A pair can be made with openssl:
//!
//! ```text
//! openssl genrsa -out tls/private-key.pem 2048
//! openssl req -x509 -new -nodes -key tls/private-key.pem -sha256 -days 1825 -out tls/certificate.pem
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use tracing::{info, warn};

use crate::config::ServerConfig;

pub const DEFAULT_CERT_PATH: &str = "tls/certificate.pem";
pub const DEFAULT_KEY_PATH: &str = "tls/private-key.pem";

/// Where the certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsSource {
    PemFiles { cert: PathBuf, key: PathBuf },
    SelfSigned,
}

impl TlsSource {
    pub fn choose(config: &ServerConfig) -> Self {
        match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => TlsSource::PemFiles {
                cert: cert.clone(),
                key: key.clone(),
            },
            (Some(_), None) | (None, Some(_)) => {
                warn!("Only one of TLS_CERT / TLS_KEY is set, ignoring both");
                Self::defaults_or_self_signed()
            }
            (None, None) => Self::defaults_or_self_signed(),
        }
    }

    fn defaults_or_self_signed() -> Self {
        let cert = Path::new(DEFAULT_CERT_PATH);
        let key = Path::new(DEFAULT_KEY_PATH);
        if cert.is_file() && key.is_file() {
            TlsSource::PemFiles {
                cert: cert.to_path_buf(),
                key: key.to_path_buf(),
            }
        } else {
            TlsSource::SelfSigned
        }
    }
}

/// Build the rustls config. `hosts` are extra addresses the self-signed
/// certificate should cover besides localhost.
pub async fn build_rustls_config(
    source: &TlsSource,
    hosts: &[IpAddr],
) -> Result<RustlsConfig, std::io::Error> {
    match source {
        TlsSource::PemFiles { cert, key } => {
            info!(cert = %cert.display(), key = %key.display(), "Using TLS certificate");
            RustlsConfig::from_pem_file(cert, key).await
        }
        TlsSource::SelfSigned => {
            let names = subject_names(hosts);
            let certified = generate_simple_self_signed(names.clone())
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            warn!(?names, "No TLS certificate found, generated a self-signed one");
            RustlsConfig::from_pem(
                certified.cert.pem().into_bytes(),
                certified.key_pair.serialize_pem().into_bytes(),
            )
            .await
        }
    }
}

fn subject_names(hosts: &[IpAddr]) -> Vec<String> {
    let mut names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    for host in hosts {
        let name = host.to_string();
        if !host.is_unspecified() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
