use http::HeaderMap;
use std::collections::{BTreeMap, HashMap};

/// Read-only header access by name.
///
/// `http::HeaderMap` matches names case-insensitively; the plain map
/// implementations match exactly, which is what a servlet-style container
/// exposing raw header names looks like.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl HeaderLookup for BTreeMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Returns the header name variants to try, in lookup order, without
/// duplicates.
///
/// Order: as given, lower, upper, title-case; then, when the name contains a
/// hyphen, the underscore form in the same four casings; then, when it
/// contains an underscore, the hyphen form in the same four casings.
pub fn header_name_variants(name: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    };

    push(name.to_string());
    push(name.to_lowercase());
    push(name.to_uppercase());
    push(capitalize_each_word(name, '-'));

    if name.contains('-') {
        let underscored = name.replace('-', "_");
        push(underscored.clone());
        push(underscored.to_lowercase());
        push(underscored.to_uppercase());
        push(capitalize_each_word(&underscored, '_'));
    }

    if name.contains('_') {
        let dashed = name.replace('_', "-");
        push(dashed.clone());
        push(dashed.to_lowercase());
        push(dashed.to_uppercase());
        push(capitalize_each_word(&dashed, '-'));
    }

    variants
}

/// Tries every variant of `name` and returns the first non-blank value.
pub fn header_with_variants<H: HeaderLookup + ?Sized>(headers: &H, name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }

    header_name_variants(name).iter().find_map(|variant| {
        headers
            .header(variant)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    })
}

/// "olink-cdn-token" -> "Olink-Cdn-Token"
fn capitalize_each_word(value: &str, delimiter: char) -> String {
    value
        .split(delimiter)
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    let rest = chars.as_str().to_lowercase();
                    first.to_uppercase().chain(rest.chars()).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(&delimiter.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_for_simple_name() {
        assert_eq!(header_name_variants("token"), vec!["token", "TOKEN", "Token"]);
    }

    #[test]
    fn test_variants_for_hyphenated_name() {
        let variants = header_name_variants("x-auth-token");
        assert_eq!(
            variants,
            vec![
                "x-auth-token",
                "X-AUTH-TOKEN",
                "X-Auth-Token",
                "x_auth_token",
                "X_AUTH_TOKEN",
                "X_Auth_Token",
            ]
        );
    }

    #[test]
    fn test_variants_for_underscored_name() {
        let variants = header_name_variants("Api_Key");
        assert_eq!(variants[0], "Api_Key");
        assert_eq!(variants[1], "api_key");
        assert_eq!(variants[2], "API_KEY");
        assert_eq!(variants[3], "Api_key");
        assert!(variants.contains(&"Api-Key".to_string()));
        assert!(variants.contains(&"api-key".to_string()));
        assert!(variants.contains(&"API-KEY".to_string()));
    }

    #[test]
    fn test_finds_any_casing() {
        for supplied in ["Token", "TOKEN", "token"] {
            let mut headers = HashMap::new();
            headers.insert(supplied.to_string(), "abc".to_string());
            assert_eq!(header_with_variants(&headers, "token"), Some("abc".to_string()));
        }
    }

    #[test]
    fn test_first_variant_in_lookup_order_wins() {
        let mut headers = HashMap::new();
        headers.insert("Token".to_string(), "title".to_string());
        headers.insert("TOKEN".to_string(), "upper".to_string());
        assert_eq!(header_with_variants(&headers, "token"), Some("upper".to_string()));
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let mut headers = HashMap::new();
        headers.insert("token".to_string(), "   ".to_string());
        headers.insert("Token".to_string(), "real".to_string());
        assert_eq!(header_with_variants(&headers, "token"), Some("real".to_string()));
    }

    #[test]
    fn test_delimiter_swap() {
        let mut headers = HashMap::new();
        headers.insert("X_AUTH_TOKEN".to_string(), "swapped".to_string());
        assert_eq!(
            header_with_variants(&headers, "x-auth-token"),
            Some("swapped".to_string())
        );
    }

    #[test]
    fn test_header_map_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("token", "from-map".parse().unwrap());
        assert_eq!(header_with_variants(&headers, "TOKEN"), Some("from-map".to_string()));
    }

    #[test]
    fn test_blank_name_resolves_nothing() {
        let headers: HashMap<String, String> = HashMap::new();
        assert_eq!(header_with_variants(&headers, " "), None);
    }
}
