//! Certificate name matching.

/// Matches a certificate name against a repository canonical name.
///
/// The names match if they are equal or the certificate name is a
/// prefix of the repository name at a `/`-boundary. The certificate
/// name may additionally start with a hostname containing a subdomain
/// wildcard:
///
/// - `*.example.com` matches any single-level subdomain of
///   `example.com`
/// - `**.example.com` matches any subdomain of `example.com`
/// - `*example.com` matches `example.com` and any of its
///   single-level subdomains
/// - `**example.com` matches `example.com` and any of its subdomains
///
/// The leading (first `/`-separated) components are compared with the
/// wildcard rules; the certificate trailing part must be empty or a
/// prefix of the repository trailing part ending at a `/`-boundary.
pub fn match_certificate_name(certificate_name: &str, repository_name: &str) -> bool {
    let split = |name: &str| -> (String, String) {
        match name.split_once('/') {
            Some((leading, trailing)) => (leading.to_string(), trailing.to_string()),
            None => (name.to_string(), String::new()),
        }
    };

    let (mut cert_leading, cert_trailing) = split(certificate_name);
    let (repo_leading, repo_trailing) = split(repository_name);

    let mut matched = if cert_leading.starts_with('*') {
        // Subdomain wildcard.
        let mut prefix = 1;
        let any = cert_leading[prefix..].starts_with('*');
        if any {
            prefix += 1;
        }
        let self_match = !cert_leading[prefix..].starts_with('.');
        if !self_match {
            prefix += 1;
        }
        cert_leading = cert_leading[prefix..].to_string();

        let cert_len = cert_leading.len();
        let repo_len = repo_leading.len();

        if repo_leading == cert_leading {
            // Equal hostnames match if self-matching is allowed.
            self_match
        } else if repo_len > cert_len
            && repo_leading.ends_with(cert_leading.as_str())
            && repo_leading.as_bytes()[repo_len - cert_len - 1] == b'.'
        {
            // A subdomain of the first level, or of any level if
            // allowed.
            any || repo_leading.find('.') == Some(repo_len - cert_len - 1)
        } else {
            false
        }
    } else {
        // Without a wildcard the leading parts must match exactly.
        repo_leading == cert_leading
    };

    if matched {
        let cert_len = cert_trailing.len();
        let repo_len = repo_trailing.len();
        // An empty path is a prefix of any path.
        matched = cert_len == 0
            || (repo_trailing.starts_with(cert_trailing.as_str())
                && (repo_len == cert_len
                    || (repo_len > cert_len && repo_trailing.as_bytes()[cert_len] == b'/')));
    }

    matched
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    // Exact hostnames.
    #[case("example.com", "example.com", true)]
    #[case("example.com", "foo.example.com", false)]
    #[case("foo.example.com", "example.com", false)]
    // Single-level subdomain wildcard, no self match.
    #[case("*.example.com", "foo.example.com", true)]
    #[case("*.example.com", "example.com", false)]
    #[case("*.example.com", "bar.foo.example.com", false)]
    // Any-level subdomain wildcard, no self match.
    #[case("**.example.com", "foo.example.com", true)]
    #[case("**.example.com", "bar.foo.example.com", true)]
    #[case("**.example.com", "example.com", false)]
    // Single-level wildcard with self match.
    #[case("*example.com", "example.com", true)]
    #[case("*example.com", "foo.example.com", true)]
    #[case("*example.com", "bar.foo.example.com", false)]
    // Any-level wildcard with self match.
    #[case("**example.com", "example.com", true)]
    #[case("**example.com", "foo.example.com", true)]
    #[case("**example.com", "bar.foo.example.com", true)]
    // A wildcard never matches a partial label.
    #[case("*example.com", "fooexample.com", false)]
    #[case("**example.com", "fooexample.com", false)]
    fn leading_part(#[case] cert: &str, #[case] repo: &str, #[case] expected: bool) {
        assert_eq!(match_certificate_name(cert, repo), expected);
    }

    #[rstest]
    // The certificate trailing part must be a /-boundary prefix.
    #[case("example.com/foo", "example.com/foo", true)]
    #[case("example.com/foo", "example.com/foo/bar", true)]
    #[case("example.com/foo", "example.com/foobar", false)]
    #[case("example.com/foo/bar", "example.com/foo", false)]
    #[case("example.com", "example.com/foo", true)]
    #[case("*.example.com/math", "foo.example.com/math/lib", true)]
    #[case("*.example.com/math", "foo.example.com/stat", false)]
    fn trailing_part(#[case] cert: &str, #[case] repo: &str, #[case] expected: bool) {
        assert_eq!(match_certificate_name(cert, repo), expected);
    }
}
