//! Server configuration loaded from environment variables and the command
//! line.
//!
//! Everything has a default so `dropspot-server` can start with zero
//! configuration. Positional arguments `[host] [port]` override the
//! environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use directories::BaseDirs;

const DEFAULT_MAX_UPLOAD_SIZE: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding `received-files/`, `hosted-files/` and
    /// `received-messages/`.
    /// Env: `DROPSPOT_ROOT`
    /// Default: `$HOME/drop-spot`
    pub root: PathBuf,

    /// Address to bind. `0.0.0.0` makes the drop spot visible on the LAN,
    /// `127.0.0.1` keeps it local.
    /// Env: `HOST`, or the first positional argument
    /// Default: `0.0.0.0`
    pub host: IpAddr,

    /// Env: `PORT`, or the second positional argument
    /// Default: `443`
    pub port: u16,

    /// PEM certificate chain. When unset, `tls/certificate.pem` is used if
    /// present, otherwise a self-signed certificate is generated.
    /// Env: `TLS_CERT`
    pub tls_cert: Option<PathBuf>,

    /// PEM private key (unencrypted).
    /// Env: `TLS_KEY`
    pub tls_key: Option<PathBuf>,

    /// Static client files served at `/`.
    /// Env: `STATIC_DIR`
    /// Default: `static`
    pub static_dir: PathBuf,

    /// Maximum request body size in bytes (2 GiB, or `usize::MAX` on
    /// targets where that does not fit).
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Maximum size of a text message body in bytes.
    /// Env: `MAX_MESSAGE_SIZE`
    /// Default: 100 KiB
    pub max_message_size: usize,

    /// Print a QR code of the LAN address at startup.
    /// Env: `SHOW_QR` (true/false)
    /// Default: `true`
    pub show_qr: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 443,
            tls_cert: None,
            tls_key: None,
            static_dir: PathBuf::from("static"),
            max_upload_size: usize::try_from(DEFAULT_MAX_UPLOAD_SIZE).unwrap_or(usize::MAX),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            show_qr: true,
        }
    }
}

fn default_root() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("drop-spot"))
        .unwrap_or_else(|| PathBuf::from("drop-spot"))
}

impl ServerConfig {
    /// Load configuration from the process environment and arguments.
    pub fn load() -> Self {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        config.apply_args(std::env::args().skip(1));
        config
    }

    /// Build a configuration from a variable lookup, falling back to defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = var("DROPSPOT_ROOT") {
            config.root = PathBuf::from(root);
        }

        if let Some(host) = var("HOST") {
            config.set_host(&host);
        }

        if let Some(port) = var("PORT") {
            config.set_port(&port);
        }

        if let Some(path) = var("TLS_CERT") {
            config.tls_cert = Some(PathBuf::from(path));
        }

        if let Some(path) = var("TLS_KEY") {
            config.tls_key = Some(PathBuf::from(path));
        }

        if let Some(dir) = var("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }

        if let Some(val) = var("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = var("MAX_MESSAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_MESSAGE_SIZE, using default"),
            }
        }

        if let Some(val) = var("SHOW_QR") {
            config.show_qr = val != "false" && val != "0";
        }

        config
    }

    /// Apply positional `[host] [port]` arguments.
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        if let Some(host) = args.next() {
            self.set_host(host.as_ref());
        }
        if let Some(port) = args.next() {
            self.set_port(port.as_ref());
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    fn set_host(&mut self, value: &str) {
        match value.parse::<IpAddr>() {
            Ok(host) => self.host = host,
            Err(_) => tracing::warn!(value = %value, "Invalid host, using default"),
        }
    }

    fn set_port(&mut self, value: &str) {
        match value.parse::<u16>() {
            Ok(port) if port > 0 => self.port = port,
            _ => tracing::warn!(value = %value, "Invalid port, using default"),
        }
    }
}
