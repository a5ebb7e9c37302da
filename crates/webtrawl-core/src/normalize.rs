//! URL canonicalization.
//!
//! Every stored URL (record `url` and `redirect_chain` entries) is in the
//! canonical form produced here, so equality on canonical strings is the
//! dedup equivalence. Hosts are case-insensitive (RFC 3986); paths, query
//! and fragment are not and are preserved verbatim.

/// Canonical form: `https://<host>[:port][path][?query][#fragment]`.
///
/// Rules, in order: trim, default the scheme to https, lowercase the host,
/// strip leading `www.`, keep a non-default port, drop trailing slashes
/// (a bare `/` path disappears entirely), keep query/fragment untouched,
/// and force the https scheme.
pub fn canonical(raw: &str) -> String {
    let trimmed = raw.trim();
    let parsed = if has_scheme(trimmed) {
        url::Url::parse(trimmed)
    } else {
        url::Url::parse(&format!("https://{trimmed}"))
    };
    match parsed {
        Ok(u) if u.host_str().is_some() => rebuild(&u),
        _ => fallback(trimmed),
    }
}

/// Two URLs are equivalent iff they canonicalize identically.
pub fn equivalent(a: &str, b: &str) -> bool {
    canonical(a) == canonical(b)
}

/// The variant set repository URL queries match against, to tolerate
/// legacy rows written before normalization: the raw input, the canonical
/// form, the bare host form, and both scheme-prefixed bare forms.
pub fn url_variants(raw: &str) -> Vec<String> {
    let canon = canonical(raw);
    let bare = canon.strip_prefix("https://").unwrap_or(&canon).to_string();
    let mut out: Vec<String> = Vec::with_capacity(5);
    for v in [
        raw.trim().to_string(),
        canon.clone(),
        bare.clone(),
        format!("http://{bare}"),
        format!("https://{bare}"),
    ] {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn has_scheme(s: &str) -> bool {
    match s.find("://") {
        Some(i) if i > 0 => {
            let scheme = &s[..i];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn strip_www(host: &str) -> &str {
    // Stripped to a fixed point so canonicalization is idempotent even for
    // hosts like `www.www.example.com`.
    let mut h = host;
    while let Some(rest) = h.strip_prefix("www.") {
        h = rest;
    }
    h
}

fn rebuild(u: &url::Url) -> String {
    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = strip_www(&host);

    let mut out = String::from("https://");
    out.push_str(host);
    // 443 is the default for the forced https scheme, so keeping it would
    // break idempotence.
    if let Some(port) = u.port() {
        if port != 443 {
            out.push(':');
            out.push_str(&port.to_string());
        }
    }

    let mut path = u.path();
    while path.len() > 1 && path.ends_with('/') {
        path = &path[..path.len() - 1];
    }
    if path != "/" {
        out.push_str(path);
    }

    if let Some(q) = u.query() {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = u.fragment() {
        out.push('#');
        out.push_str(f);
    }
    out
}

/// Best-effort canonicalization for strings the URL parser rejects:
/// lowercase the authority, strip `www.`, keep the rest verbatim.
fn fallback(s: &str) -> String {
    let rest = if has_scheme(s) {
        match s.find("://") {
            Some(i) => &s[i + 3..],
            None => s,
        }
    } else {
        s
    };
    let split = rest
        .find(['/', '?', '#'])
        .unwrap_or(rest.len());
    let (authority, remainder) = rest.split_at(split);
    let authority = authority.to_ascii_lowercase();
    let authority = strip_www(&authority);
    format!("https://{authority}{remainder}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collapses_equivalent_forms() {
        for raw in [
            "ynet.co.il",
            "https://www.ynet.co.il/",
            "HTTP://ynet.co.il",
            "  https://ynet.co.il  ",
            "http://www.ynet.co.il",
        ] {
            assert_eq!(canonical(raw), "https://ynet.co.il", "raw={raw:?}");
        }
    }

    #[test]
    fn preserves_path_and_query_case() {
        assert_eq!(
            canonical("https://x.com/Foo?A=B"),
            "https://x.com/Foo?A=B"
        );
        assert_eq!(
            canonical("https://X.com/Foo/?A=B#Frag"),
            "https://x.com/Foo?A=B#Frag"
        );
    }

    #[test]
    fn keeps_non_default_ports() {
        assert_eq!(canonical("example.com:8080/a"), "https://example.com:8080/a");
        assert_eq!(canonical("http://example.com:443"), "https://example.com");
    }

    #[test]
    fn drops_bare_slash_path() {
        assert_eq!(canonical("https://example.com/"), "https://example.com");
        assert_eq!(canonical("https://example.com/a/"), "https://example.com/a");
    }

    #[test]
    fn fallback_handles_unparseable_input() {
        let c = canonical("https://WWW.bad host/Path A");
        assert_eq!(c, "https://bad host/Path A");
        assert_eq!(canonical(&c), c);
    }

    #[test]
    fn equivalence() {
        assert!(equivalent("ynet.co.il", "https://www.ynet.co.il/"));
        assert!(!equivalent("https://x.com/a", "https://x.com/A"));
    }

    #[test]
    fn variant_set_covers_legacy_forms() {
        let vs = url_variants("www.Example.com/a");
        assert!(vs.contains(&"https://example.com/a".to_string()));
        assert!(vs.contains(&"example.com/a".to_string()));
        assert!(vs.contains(&"http://example.com/a".to_string()));
        assert!(vs.contains(&"www.Example.com/a".to_string()));
    }

    proptest! {
        #[test]
        fn canonical_is_idempotent(raw in any::<String>()) {
            let once = canonical(&raw);
            prop_assert_eq!(canonical(&once), once);
        }

        #[test]
        fn canonical_always_https(raw in any::<String>()) {
            prop_assert!(canonical(&raw).starts_with("https://"));
        }
    }
}
