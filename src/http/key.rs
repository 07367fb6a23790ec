//! Caller identity derivation.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Key shared by all unidentifiable callers under [`KeyPolicy::Pool`].
pub const POOLED_KEY: &str = "unknown";

/// What to do with a request whose caller identity cannot be determined.
///
/// Pooling matches the widely observed middleware behavior, but it quietly
/// shares one quota among unrelated callers, so the choice is explicit
/// configuration rather than an implicit catch-all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Share a single quota among all unidentifiable callers
    #[default]
    Pool,
    /// Reject such requests outright
    Reject,
}

/// Derive the caller key for a request.
///
/// Prefers the forwarded-client headers (`x-forwarded-for` first hop, then
/// `x-real-ip`) over the transport peer address, and normalizes the result
/// to a canonical IP string. An address that is present but unparseable is a
/// derivation failure, not a silent fallthrough to the next source.
pub fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<String> {
    if let Some(raw) = header_value(headers, FORWARDED_FOR).or_else(|| header_value(headers, REAL_IP))
    {
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| TurnstileError::Key(format!("unparseable client address {:?}", raw)))?;
        return Ok(ip.to_string());
    }

    match peer {
        Some(addr) => Ok(addr.ip().to_string()),
        None => Err(TurnstileError::Key(
            "no forwarded-client header and no peer address".to_string(),
        )),
    }
}

/// First hop of a possibly comma-separated forwarding chain.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.9:45120".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.5"));
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.2"));

        assert_eq!(caller_key(&headers, peer()).unwrap(), "203.0.113.5");
    }

    #[test]
    fn test_forwarded_chain_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.5, 10.0.0.1, 10.0.0.2"),
        );

        assert_eq!(caller_key(&headers, peer()).unwrap(), "203.0.113.5");
    }

    #[test]
    fn test_real_ip_when_no_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.2"));

        assert_eq!(caller_key(&headers, peer()).unwrap(), "198.51.100.2");
    }

    #[test]
    fn test_peer_address_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(caller_key(&headers, peer()).unwrap(), "192.0.2.9");
    }

    #[test]
    fn test_ipv6_is_normalized() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("2001:db8:0:0:0:0:0:1"),
        );

        assert_eq!(caller_key(&headers, peer()).unwrap(), "2001:db8::1");
    }

    #[test]
    fn test_unparseable_header_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("not-an-address"));

        assert!(caller_key(&headers, peer()).is_err());
    }

    #[test]
    fn test_no_source_is_an_error() {
        let headers = HeaderMap::new();
        assert!(caller_key(&headers, None).is_err());
    }
}
