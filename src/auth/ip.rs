//! Client IP extraction utilities.

use std::net::{IpAddr, SocketAddr};

use axum::{extract::ConnectInfo, http::request::Parts};

/// Header consulted when running behind a trusted reverse proxy.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract the client IP address.
///
/// With `trust_forwarded_for`, the first address of `X-Forwarded-For` is used and
/// a missing or unparseable header is an error (no fallback to the socket
/// address). Otherwise the peer address from `ConnectInfo` is used.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    trust_forwarded_for: bool,
) -> Result<String, &'static str> {
    if trust_forwarded_for {
        let header_value = source
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .ok_or("IP header not present")?
            .to_str()
            .map_err(|_| "IP header contains invalid characters")?;
        let first = header_value
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default();
        return first
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header is not an address");
    }

    source
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .ok_or("No client IP available")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;

    #[test]
    fn test_connect_info_is_used_by_default() {
        let mut request = Request::builder()
            .header(FORWARDED_FOR_HEADER, "9.9.9.9")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))));

        assert_eq!(extract_client_ip(&request, false).unwrap(), "10.1.2.3");
    }

    #[test]
    fn test_forwarded_for_takes_first_address() {
        let request = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&request, true).unwrap(), "203.0.113.7");
    }

    #[test]
    fn test_forwarded_for_required_when_trusted() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))));

        assert!(extract_client_ip(&request, true).is_err());
    }

    #[test]
    fn test_garbage_forwarded_for_rejected() {
        let request = Request::builder()
            .header(FORWARDED_FOR_HEADER, "not-an-ip")
            .body(Body::empty())
            .unwrap();

        assert!(extract_client_ip(&request, true).is_err());
    }

    #[test]
    fn test_no_address_at_all() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, false).is_err());
    }
}
