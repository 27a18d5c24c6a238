//! Entity name normalization.
//!
//! Canonical names are the deduplication key for entities: two surface forms
//! that normalize identically resolve to the same entity row, with the
//! original spellings preserved as aliases.

/// Normalize a surface form into its canonical name: lowercase, whitespace
/// collapsed to single spaces, leading/trailing non-alphanumeric characters
/// trimmed.
pub fn canonical_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_matches(|c: char| !c.is_alphanumeric()).to_string()
}

/// Extract the registrable host from a URL-ish string, lowercased with any
/// `www.` prefix removed. Returns `None` for strings without a host part.
pub fn extract_domain(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    let host = host.split('@').next_back()?;
    let host = host.split(':').next()?;

    let host = host.trim().to_lowercase();
    if host.is_empty() || !host.contains('.') {
        return None;
    }

    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Whether `domain` equals `pattern` or is a subdomain of it.
///
/// Blocking `example.com` also blocks `sub.example.com`, but not
/// `notexample.com`.
pub fn domain_matches(domain: &str, pattern: &str) -> bool {
    domain == pattern || domain.ends_with(&format!(".{pattern}"))
}
