//! Domain pattern filtering.
//!
//! Envoy server-name and virtual-host matching only accepts a limited set of
//! wildcard forms. Only patterns of the shape `*.<suffix>` survive, and only
//! when the suffix is not made up entirely of numeric labels (which would
//! look like a partial IP address such as `*.1.1.1`).

use tracing::debug;

/// Keep only the patterns usable as wildcard matchers, preserving order.
pub fn filter_wildcard_domains<S: AsRef<str>>(domains: &[S]) -> Vec<String> {
    domains
        .iter()
        .map(AsRef::as_ref)
        .filter(|domain| {
            let keep = is_wildcard_domain(domain);
            if !keep {
                debug!(domain = %domain, "Excluding domain from bypass matchers");
            }
            keep
        })
        .map(str::to_string)
        .collect()
}

fn is_wildcard_domain(domain: &str) -> bool {
    match domain.strip_prefix("*.") {
        Some(rest) if !rest.is_empty() => !rest.split('.').all(is_numeric_label),
        _ => false,
    }
}

fn is_numeric_label(label: &str) -> bool {
    !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_partial_wildcards() {
        let cases: &[(&[&str], &[&str])] = &[
            (&["*.abc.com", "*.1.1.1"], &["*.abc.com"]),
            (&["*.abc.com", "192.168.1.1"], &["*.abc.com"]),
            (&["asd.abc.com", "192.168.1.1"], &[]),
            (&["*.abc.com", "*"], &["*.abc.com"]),
            (&["*.abc.com", "*.asd.1.1"], &["*.abc.com", "*.asd.1.1"]),
        ];

        for (input, expected) in cases {
            assert_eq!(filter_wildcard_domains(*input), *expected, "input: {:?}", input);
        }
    }

    #[test]
    fn drops_empty_suffix_and_degenerate_forms() {
        assert!(filter_wildcard_domains(&["*.", "*", "", "**.com", "*abc.com"]).is_empty());
    }

    #[test]
    fn signed_or_empty_labels_are_not_numeric() {
        assert_eq!(filter_wildcard_domains(&["*.+1.2"]), vec!["*.+1.2"]);
        assert_eq!(filter_wildcard_domains(&["*.1..2"]), vec!["*.1..2"]);
    }

    #[test]
    fn preserves_input_order() {
        let input = ["*.z.com", "x.com", "*.a.com", "*.m.com"];
        assert_eq!(filter_wildcard_domains(&input), vec!["*.z.com", "*.a.com", "*.m.com"]);
    }
}
