use std::sync::OnceLock;

use regex::Regex;

/// Extract the owner and repository name from a GitHub repository URL.
pub fn extract_github_url(url: &str) -> Option<(&str, &str)> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let caps = REGEX
        .get_or_init(|| {
            Regex::new(r"^https?://github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?(?:/|$)")
                .unwrap()
        })
        .captures(url)?;
    let owner = caps.name("owner").map(|m| m.as_str()).unwrap_or_default();
    let repo = caps.name("repo").map(|m| m.as_str()).unwrap_or_default();
    Some((owner, repo))
}

/// Normalize a configured repository reference to `owner/repo`.
///
/// Accepts either the plain `owner/repo` form or a GitHub URL.
pub fn normalize_repo_name(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some((owner, repo)) = extract_github_url(value) {
        return Some(format!("{owner}/{repo}"));
    }
    let (owner, repo) = value.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(value.to_string())
}

/// Directory name used for a repository's downloaded reports.
pub fn repo_slug(name: &str) -> String { name.replace('/', "-") }

#[cfg(test)]
mod tests {
    use super::{extract_github_url, normalize_repo_name, repo_slug};

    #[test]
    fn test_extract_github_url() {
        let cases: &[(&str, Option<(&str, &str)>)] = &[
            ("https://github.com/foo/bar", Some(("foo", "bar"))),
            ("http://github.com/foo/bar/", Some(("foo", "bar"))),
            ("https://github.com/foo/bar.git", Some(("foo", "bar"))),
            ("https://github.com/foo/bar/actions/runs/17", Some(("foo", "bar"))),
            ("https://gitlab.com/foo/bar", None),
            ("https://github.com/foo", None),
        ];
        for &(url, expected) in cases {
            assert_eq!(extract_github_url(url), expected);
        }
    }

    #[test]
    fn test_normalize_repo_name() {
        let cases: &[(&str, Option<&str>)] = &[
            ("NVIDIA/nim-deploy", Some("NVIDIA/nim-deploy")),
            ("  foo/bar ", Some("foo/bar")),
            ("https://github.com/foo/bar.git", Some("foo/bar")),
            ("foo", None),
            ("/bar", None),
            ("foo/", None),
            ("foo/bar/baz", None),
        ];
        for &(value, expected) in cases {
            assert_eq!(normalize_repo_name(value).as_deref(), expected, "{value}");
        }
    }

    #[test]
    fn test_repo_slug() {
        assert_eq!(repo_slug("foo/bar"), "foo-bar");
    }
}
