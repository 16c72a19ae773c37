//! Company-name and website normalization.
//!
//! Normalized names are the soft dedup key: lowercased, legal-entity
//! suffixes stripped, punctuation collapsed. Websites reduce to a bare
//! domain so `https://www.acme.example/about` and `acme.example` compare
//! equal.

use url::Url;

/// Legal-entity suffix tokens stripped from the end of a normalized name.
/// Kept lowercase; matched per token after punctuation collapse.
const LEGAL_SUFFIXES: &[&str] = &[
    "ltd", "limited", "plc", "llp", "llc", "inc", "incorporated", "corp", "corporation", "co",
    "company", "gmbh", "ag", "ug", "kg", "kgaa", "sa", "sarl", "sas", "srl", "spa", "bv", "nv",
    "ab", "as", "aps", "oy", "oyj", "holdings", "holding", "group",
];

/// Normalize a company name for key lookups and similarity scoring.
///
/// Lowercases, replaces punctuation with spaces, collapses whitespace, and
/// strips trailing legal-entity suffixes ("Acme Ltd" and "Acme Limited"
/// both normalize to "acme").
pub fn normalize_name(name: &str) -> String {
    let collapsed: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = collapsed.split_whitespace().collect();

    // Strip suffix tokens from the end, but never strip a name to nothing.
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        if LEGAL_SUFFIXES.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join(" ")
}

/// Token-based similarity between two already-normalized names, in [0,1].
///
/// Tokens are sorted before comparison so word order does not matter
/// ("solutions acme" vs "acme solutions").
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let sort_tokens = |s: &str| -> String {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };

    strsim::jaro_winkler(&sort_tokens(a), &sort_tokens(b))
}

/// Reduce a website value to a bare lowercase domain, stripping scheme,
/// path, and a leading `www.`. Returns `None` for values with no usable
/// host.
pub fn website_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{trimmed}")))
        .ok()?;

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.contains('.') { Some(host) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_legal_suffixes() {
        assert_eq!(normalize_name("Acme Ltd"), "acme");
        assert_eq!(normalize_name("Acme Limited"), "acme");
        assert_eq!(normalize_name("Müller GmbH"), "müller");
        assert_eq!(normalize_name("Acme Holdings Group Ltd"), "acme");
        assert_eq!(normalize_name("Acme-Solutions SA"), "acme solutions");
    }

    #[test]
    fn never_strips_to_empty() {
        assert_eq!(normalize_name("Limited"), "limited");
        assert_eq!(normalize_name("Group Holdings"), "group");
    }

    #[test]
    fn collapses_punctuation_and_whitespace() {
        assert_eq!(normalize_name("  ACME   Widgets  "), "acme widgets");
        assert_eq!(normalize_name("A.C.M.E. Widgets"), "a c m e widgets");
    }

    #[test]
    fn similarity_is_order_insensitive() {
        let a = normalize_name("Acme Solutions");
        let b = normalize_name("Solutions Acme");
        assert_eq!(name_similarity(&a, &b), 1.0);
    }

    #[test]
    fn similarity_scores_near_names_high() {
        let a = normalize_name("Acme Widgets");
        let b = normalize_name("Acme Widgts");
        assert!(name_similarity(&a, &b) > 0.9);

        let c = normalize_name("Zeta Pharma");
        assert!(name_similarity(&a, &c) < 0.7);
    }

    #[test]
    fn similarity_handles_empty() {
        assert_eq!(name_similarity("", "acme"), 0.0);
        assert_eq!(name_similarity("acme", ""), 0.0);
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(
            website_domain("https://www.acme.example/about?ref=x"),
            Some("acme.example".into())
        );
        assert_eq!(website_domain("acme.example"), Some("acme.example".into()));
        assert_eq!(
            website_domain("http://ACME.Example/path"),
            Some("acme.example".into())
        );
        assert_eq!(website_domain(""), None);
        assert_eq!(website_domain("not a url"), None);
    }
}
