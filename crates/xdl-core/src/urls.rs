//! URL and hostname helpers
//!
//! Pure functions shared by the tunnel manager and the manifest endpoint:
//! hostname derivation, bundle query strings, base URL construction and the
//! random identifiers persisted per project / per user.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use rand::Rng;
use url::Url;

use crate::error::{Error, Result};
use crate::types::{HostType, PackagerInfo, ProjectSettings};

const IDENTIFIER_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Lowercase a value and collapse anything that is not `[a-z0-9-]` into `-`,
/// so it can be used as a DNS label.
pub fn domainify(value: &str) -> String {
    let mut label = String::with_capacity(value.len());
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            label.push(ch);
        } else if !label.ends_with('-') {
            label.push('-');
        }
    }
    label.trim_matches('-').to_string()
}

/// Random lowercase alphanumeric string of `len` characters
pub fn random_identifier(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| IDENTIFIER_ALPHABET[rng.gen_range(0..IDENTIFIER_ALPHABET.len())] as char)
        .collect()
}

/// Per-project URL nonce, e.g. `k3-9xq`
pub fn url_randomness() -> String {
    format!("{}-{}", random_identifier(2), random_identifier(3))
}

/// Stand-in username for tunnel hostnames while logged out, e.g. `anon-4kz81qpa`
pub fn placeholder_username() -> String {
    format!("anon-{}", random_identifier(8))
}

/// Derive the public tunnel hostname.
///
/// `<nonce>.<user>.<project>.<domain>`; user and project are domainified.
pub fn tunnel_hostname(nonce: &str, username: &str, project_name: &str, domain: &str) -> String {
    [
        nonce.to_string(),
        domainify(username),
        domainify(project_name),
        domain.to_string(),
    ]
    .join(".")
}

/// Rewrite a leading `https` scheme to `http`.
pub fn to_http_url(url: &str) -> String {
    match url.strip_prefix("https") {
        Some(rest) => format!("http{}", rest),
        None => url.to_string(),
    }
}

/// Build the bundle query string from packager options.
pub fn bundle_query_params(settings: &ProjectSettings) -> String {
    let mut params = format!("dev={}", settings.dev);
    if let Some(strict) = settings.strict {
        params.push_str(&format!("&strict={}", strict));
    }
    if let Some(minify) = settings.minify {
        params.push_str(&format!("&minify={}", minify));
    }
    params
}

/// Build the HTTP base URL clients use to reach the local server.
///
/// Tunnel hosts fall back to the LAN address while no tunnel URL is known.
pub fn construct_base_url(
    host_type: HostType,
    info: &PackagerInfo,
    lan_ip: IpAddr,
) -> Result<String> {
    let port = info
        .port
        .ok_or_else(|| Error::manifest("no local server port recorded for this project"))?;

    let host = match (host_type, info.ngrok.as_deref()) {
        (HostType::Tunnel, Some(tunnel_url)) => {
            let parsed = Url::parse(tunnel_url)
                .map_err(|e| Error::manifest(format!("invalid tunnel url {}: {}", tunnel_url, e)))?;
            let host = parsed
                .host_str()
                .ok_or_else(|| Error::manifest(format!("tunnel url has no host: {}", tunnel_url)))?;
            return Ok(format!("http://{}", host));
        }
        (HostType::Tunnel, None) => {
            tracing::debug!("no tunnel url yet, falling back to LAN address");
            lan_ip.to_string()
        }
        (HostType::Lan, _) => lan_ip.to_string(),
        (HostType::Localhost, _) => "localhost".to_string(),
    };

    Ok(format!("http://{}:{}", host, port))
}

/// `<lan ip>:<packager port>`
pub fn debugger_host(lan_ip: IpAddr, packager_port: u16) -> String {
    format!("{}:{}", lan_ip, packager_port)
}

/// Best-effort LAN address of this machine.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// interface would route to a public address.
pub fn lan_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
