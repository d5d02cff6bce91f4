use crate::request::headers::HeaderLookup;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::OnceLock;

/// Headers consulted for the client address, most authoritative first.
pub const CLIENT_IP_HEADERS: [&str; 5] = [
    "x-forwarded-for",
    "Proxy-Client-IP",
    "WL-Proxy-Client-IP",
    "HTTP_CLIENT_IP",
    "HTTP_X_FORWARDED_FOR",
];

pub const UNKNOWN_IP: &str = "unknown";

const LOOPBACK_NAMES: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0:0:0:0:0:0:0:1"];

static PRIMARY_ADDRESS: OnceLock<Option<String>> = OnceLock::new();

/// Resolves the caller address from proxy headers, falling back to the socket
/// address.
///
/// A forwarded chain keeps only its first entry. Loopback addresses are
/// replaced by the host's primary address so that local callers share one
/// stable identity.
pub fn resolve_client_ip<H: HeaderLookup + ?Sized>(
    headers: &H,
    remote_addr: Option<SocketAddr>,
) -> String {
    let forwarded = CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.header(name))
        .map(str::trim)
        .find(|value| is_usable(value))
        .map(str::to_string);

    let ip = match forwarded {
        Some(ip) => ip,
        None => match remote_addr {
            Some(addr) => addr.ip().to_string(),
            None => return UNKNOWN_IP.to_string(),
        },
    };

    let ip = first_in_chain(&ip);

    if is_loopback(&ip) {
        if let Some(primary) = primary_host_address() {
            return primary;
        }
    }

    ip
}

fn is_usable(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case(UNKNOWN_IP)
}

fn first_in_chain(value: &str) -> String {
    value
        .split(',')
        .next()
        .map(str::trim)
        .unwrap_or(value)
        .to_string()
}

fn is_loopback(ip: &str) -> bool {
    LOOPBACK_NAMES.iter().any(|name| name.eq_ignore_ascii_case(ip))
        || ip.parse::<IpAddr>().map(|addr| addr.is_loopback()).unwrap_or(false)
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends nothing; it only selects a route.
pub fn primary_host_address() -> Option<String> {
    PRIMARY_ADDRESS
        .get_or_init(|| {
            let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
            socket.connect("8.8.8.8:80").ok()?;
            let ip = socket.local_addr().ok()?.ip();
            if ip.is_loopback() || ip.is_unspecified() {
                None
            } else {
                Some(ip.to_string())
            }
        })
        .clone()
}
