const URL_PREFIXES: [&str; 8] = [
    "https://x.com/",
    "https://twitter.com/",
    "http://x.com/",
    "http://twitter.com/",
    "https://www.x.com/",
    "https://www.twitter.com/",
    "x.com/",
    "twitter.com/",
];

/// Reduces a profile URL, `@handle` or `handle/status/..` path to the bare
/// handle.
pub fn normalize_handle(input: &str) -> String {
    let mut account = input.trim();

    for prefix in URL_PREFIXES {
        let matches = account
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false);
        if matches {
            account = &account[prefix.len()..];
            break;
        }
    }

    let account = account.strip_prefix('@').unwrap_or(account);
    let account = account
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    account.trim().to_string()
}

/// Turns a permalink `href` into an absolute URL on `base_url`.
pub fn canonical_post_url(href: &str, base_url: &str) -> String {
    if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        href.to_string()
    }
}

/// Handle safe to use as a file stem. Only the characters X allows in a
/// handle survive, so `-` never appears in an account stem.
pub fn sanitize_handle(handle: &str) -> String {
    handle
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_forms_normalize_to_same_value() {
        for input in [
            "https://x.com/foo",
            "@foo",
            "foo/status/123",
            "foo",
            "  https://Twitter.com/foo/  ",
            "x.com/foo?lang=en",
        ] {
            assert_eq!(normalize_handle(input), "foo", "input {input:?}");
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize_handle(""), "");
        assert_eq!(normalize_handle("@"), "");
    }

    #[test]
    fn relative_permalinks_get_base_url() {
        assert_eq!(
            canonical_post_url("/foo/status/1", "https://x.com/"),
            "https://x.com/foo/status/1"
        );
        assert_eq!(
            canonical_post_url("https://x.com/foo/status/1", "https://x.com"),
            "https://x.com/foo/status/1"
        );
    }

    #[test]
    fn sanitize_strips_path_characters() {
        assert_eq!(sanitize_handle("../ev il_na-me"), "evil_name");
    }
}
