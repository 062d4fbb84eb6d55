//! URL normalization and domain matching for search results.

use url::Url;

fn with_scheme(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{raw}")
    }
}

/// Canonical form used for deduplication: scheme added when missing, host lowercased,
/// fragment and trailing slash dropped.
pub fn normalize_url(raw: &str) -> String {
    let prefixed = with_scheme(raw);
    let Ok(mut url) = Url::parse(&prefixed) else {
        return prefixed;
    };
    url.set_fragment(None);
    let rendered = url.to_string();
    if url.query().is_none() {
        rendered.trim_end_matches('/').to_string()
    } else {
        rendered
    }
}

/// Lowercased host of `url`, if it parses.
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(&with_scheme(url))
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
}

/// True when `url`'s host equals `domain` or is a subdomain of it. `domain` may itself be a URL.
pub fn is_domain_match(url: &str, domain: &str) -> bool {
    if url.trim().is_empty() || domain.trim().is_empty() {
        return false;
    }
    let Some(wanted) = extract_domain(domain) else {
        return false;
    };
    let Some(host) = extract_domain(url) else {
        return false;
    };
    host == wanted || host.ends_with(&format!(".{wanted}"))
}

/// Resolves DuckDuckGo `/l/?uddg=` redirect links to their target.
pub fn decode_redirect(href: &str) -> String {
    if !href.contains("uddg=") {
        return href.to_string();
    }
    Url::parse(&with_scheme(href))
        .ok()
        .and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| href.to_string())
}
