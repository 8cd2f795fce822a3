use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Reasons a subscription URL is refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("Localhost not allowed")]
    Localhost,
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(IpAddr),
}

/// Validates a URL given to `subscribe`.
///
/// Only `http`/`https` URLs with a public host are accepted (SSRF guard:
/// localhost, loopback, private, link-local and unspecified addresses are
/// rejected).
///
/// # Examples
///
/// ```
/// use feedreader::util::validate_feed_url;
///
/// assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_feed_url("http://localhost/feed").is_err());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let ip = match url.host() {
        None => return Err(UrlValidationError::MissingHost),
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err(UrlValidationError::Localhost);
            }
            return Ok(url);
        }
        Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
        Some(Host::Ipv6(v6)) => IpAddr::V6(v6),
    };

    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    if is_non_public(&ip) {
        return Err(UrlValidationError::PrivateIp(ip));
    }

    Ok(url)
}

fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified() || is_unique_local(v6) || is_unicast_link_local(v6),
    }
}

// fc00::/7
fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

// fe80::/10
fn is_unicast_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org:8080/rss").is_ok());
        assert!(validate_feed_url("http://93.184.216.34/feed").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("ftp://example.com/feed").is_err());
    }

    #[test]
    fn test_unparseable() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected() {
        assert!(matches!(
            validate_feed_url("http://localhost/feed"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_feed_url("http://127.0.0.1/feed").is_err());
        assert!(validate_feed_url("http://[::1]/feed").is_err());
    }

    #[test]
    fn test_private_ranges_rejected() {
        for url in [
            "http://192.168.1.1/feed",
            "http://10.0.0.1:3000/feed",
            "http://172.16.0.1/feed",
            "http://169.254.1.1/feed",
            "http://0.0.0.0/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
        ] {
            assert!(
                matches!(validate_feed_url(url), Err(UrlValidationError::PrivateIp(_))),
                "{url} should be rejected"
            );
        }
    }
}
