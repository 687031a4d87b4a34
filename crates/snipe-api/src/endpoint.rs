//! Named API endpoints.

use snipe_core::{ConfigError, ConfigResult};

/// Known endpoint names and their base URLs.
pub const ENDPOINTS: &[(&str, &str)] = &[
    ("ovh-eu", "https://eu.api.ovh.com/1.0"),
    ("ovh-ca", "https://ca.api.ovh.com/1.0"),
    ("ovh-us", "https://api.us.ovhcloud.com/1.0"),
    ("kimsufi-eu", "https://eu.api.kimsufi.com/1.0"),
    ("kimsufi-ca", "https://ca.api.kimsufi.com/1.0"),
    ("soyoustart-eu", "https://eu.api.soyoustart.com/1.0"),
    ("soyoustart-ca", "https://ca.api.soyoustart.com/1.0"),
];

/// Resolve an endpoint name, or accept an explicit base URL.
///
/// The returned base never ends with `/`, so paths can be appended directly.
pub fn resolve_endpoint(endpoint: &str) -> ConfigResult<String> {
    let endpoint = endpoint.trim();

    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.trim_end_matches('/').to_string());
    }

    ENDPOINTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(endpoint))
        .map(|(_, url)| (*url).to_string())
        .ok_or_else(|| ConfigError::UnknownEndpoint(endpoint.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_endpoints() {
        assert_eq!(
            resolve_endpoint("ovh-eu").unwrap(),
            "https://eu.api.ovh.com/1.0"
        );
        assert_eq!(
            resolve_endpoint("OVH-US").unwrap(),
            "https://api.us.ovhcloud.com/1.0"
        );
    }

    #[test]
    fn test_explicit_url_is_verbatim() {
        assert_eq!(
            resolve_endpoint("http://127.0.0.1:8080/1.0/").unwrap(),
            "http://127.0.0.1:8080/1.0"
        );
    }

    #[test]
    fn test_unknown_endpoint() {
        assert_eq!(
            resolve_endpoint("ovh-mars"),
            Err(ConfigError::UnknownEndpoint("ovh-mars".to_string()))
        );
    }
}
