//! SSDP discovery: when no `manager_url` is configured, the worker finds its
//! Manager by broadcasting an M-SEARCH over UDP and reading the `LOCATION`
//! header out of the first reply.
//!
//! There is no prior art for this in the rest of the worker: it is the one
//! piece of the startup sequence with no analogous teacher module, built
//! directly from `tokio::net::UdpSocket` against the parameters the
//! specification fixes (multicast group, port, attempt/retry counts).

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const IPV4_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const IPV6_MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x000c);
const SSDP_PORT: u16 = 1900;
const SENDS_PER_ATTEMPT: usize = 2;
const ATTEMPTS: usize = 5;
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

const SEARCH_TARGET: &str = "urn:flamenco:manager:0";

fn m_search_request(host: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {host}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {st}\r\n\
         \r\n",
        host = host,
        st = SEARCH_TARGET,
    )
}

/// Broadcast M-SEARCH over both IPv4 and IPv6 multicast, retrying up to
/// `ATTEMPTS` times, and return the `LOCATION` header of the first valid
/// reply. Returns `None` if no Manager answers within the attempt budget.
pub async fn discover_manager_url() -> Option<String> {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to bind discovery socket: {}", e);
            return None;
        }
    };

    let v4_target: SocketAddr = (IPV4_MULTICAST_ADDR, SSDP_PORT).into();
    let v6_target: SocketAddr = (IPV6_MULTICAST_ADDR, SSDP_PORT).into();
    let v4_request = m_search_request(&format!("{}:{}", IPV4_MULTICAST_ADDR, SSDP_PORT));
    let v6_request = m_search_request(&format!("[{}]:{}", IPV6_MULTICAST_ADDR, SSDP_PORT));

    for attempt in 0..ATTEMPTS {
        for _ in 0..SENDS_PER_ATTEMPT {
            let _ = socket.send_to(v4_request.as_bytes(), v4_target).await;
            let _ = socket.send_to(v6_request.as_bytes(), v6_target).await;
        }

        let mut buf = [0u8; 2048];
        match tokio::time::timeout(RECEIVE_TIMEOUT, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if let Some(location) = parse_location_header(&buf[..len]) {
                    debug!("discovered manager at {} via {}", location, from);
                    return Some(location);
                }
            }
            Ok(Err(e)) => warn!("discovery receive error on attempt {}: {}", attempt, e),
            Err(_) => debug!("discovery attempt {} timed out", attempt),
        }
    }

    None
}

fn parse_location_header(response: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(response).ok()?;
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("location") {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_header_case_insensitively() {
        let response = "HTTP/1.1 200 OK\r\nLocation: http://10.0.0.5:8080\r\nST: urn:render-farm:manager:1\r\n\r\n";
        assert_eq!(parse_location_header(response.as_bytes()), Some("http://10.0.0.5:8080".to_string()));
    }

    #[test]
    fn returns_none_without_a_location_header() {
        let response = "HTTP/1.1 200 OK\r\nST: urn:render-farm:manager:1\r\n\r\n";
        assert_eq!(parse_location_header(response.as_bytes()), None);
    }
}
