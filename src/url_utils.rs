//! URL helper functions used throughout the coordinator.

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum UrlError {
    #[error("invalid URL: {0}")]
    Invalid(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Canonicalize a URL for deduplication and dispatch.
///
/// Rules, in order: parse (http/https only), lowercase host, strip fragment,
/// strip a trailing `/` from the path (except root), sort query parameters
/// lexicographically with repeated values preserved.
pub fn normalize_url(raw: &str) -> Result<String, UrlError> {
    let mut parsed = Url::parse(raw.trim()).map_err(|e| UrlError::Invalid(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }

    // Url::parse already lowercases registered names, but not every host kind.
    if let Some(host) = parsed.host_str() {
        let lowered = host.to_ascii_lowercase();
        if lowered != host {
            parsed
                .set_host(Some(&lowered))
                .map_err(|e| UrlError::Invalid(e.to_string()))?;
        }
    } else {
        return Err(UrlError::Invalid(format!("no host in {}", raw)));
    }

    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(&path[..path.len() - 1]);
    }

    if parsed.query().is_some() {
        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            parsed.set_query(None);
        } else {
            pairs.sort();
            let rebuilt = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&pairs)
                .finish();
            parsed.set_query(Some(&rebuilt));
        }
    }

    Ok(parsed.to_string())
}

/// Extract the host portion of a URL.
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
}

/// Check whether two domains match, including subdomain variants.
pub fn is_same_domain(url_domain: &str, base_domain: &str) -> bool {
    url_domain == base_domain
        || url_domain.ends_with(&format!(".{}", base_domain))
        || base_domain.ends_with(&format!(".{}", url_domain))
}

/// Domain comparison honoring the `include_subdomains` scope setting.
pub fn domains_match(url_domain: &str, base_domain: &str, include_subdomains: bool) -> bool {
    if include_subdomains {
        is_same_domain(url_domain, base_domain)
    } else {
        url_domain == base_domain
    }
}
