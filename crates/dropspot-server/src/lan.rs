//! Local network address discovery and the startup QR code.

use std::net::{IpAddr, SocketAddr};

use qrcode::render::unicode;
use qrcode::QrCode;
use tracing::{debug, warn};

/// Address peers on the LAN should use, if there is one.
///
/// A wildcard bind is advertised under the machine's LAN IP. A specific bind
/// address is advertised as-is unless it is loopback, which peers cannot
/// reach.
pub fn advertised_ip(bind: IpAddr) -> Option<IpAddr> {
    if bind.is_unspecified() {
        return lan_ip();
    }
    if bind.is_loopback() {
        return None;
    }
    Some(bind)
}

fn lan_ip() -> Option<IpAddr> {
    match local_ip_address::local_ip() {
        Ok(ip) => {
            debug!(%ip, "Found LAN address");
            Some(ip)
        }
        Err(e) => {
            warn!(error = %e, "Could not determine the address on the local network");
            None
        }
    }
}

pub fn https_url(addr: SocketAddr) -> String {
    let host = match addr.ip() {
        IpAddr::V6(ip) => format!("[{ip}]"),
        ip => ip.to_string(),
    };
    match addr.port() {
        443 => format!("https://{host}"),
        port => format!("https://{host}:{port}"),
    }
}

/// Render `data` as a QR code made of half-block characters.
pub fn render_qr(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}
