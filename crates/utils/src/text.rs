use std::sync::OnceLock;

use regex::Regex;

/// Replaces whitespace with underscores and strips commas so uploaded
/// filenames are safe to store on disk and embed in JSON.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != ',')
        .map(|c| if c == ' ' || c == '\t' { '_' } else { c })
        .collect()
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Entity and field names end up interpolated into DDL and queries, so
/// they are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= 64 && identifier_re().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_whitespace_and_strips_commas() {
        assert_eq!(sanitize_filename("my report, final.pdf"), "my_report_final.pdf");
        assert_eq!(sanitize_filename("a\tb c"), "a_b_c");
    }

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("_admins"));
        assert!(is_valid_identifier("posts"));
        assert!(is_valid_identifier("a2_b"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("drop table;"));
        assert!(!is_valid_identifier("name-with-dash"));
    }
}
