//! Wildcard matching for upstream allow-lists and spoof owner names.
//!
//! The only metacharacter is `*`, which matches any run of bytes including
//! the empty one. There are no character classes and no escaping.

/// Match `s` against `pattern`, where `*` matches zero or more bytes.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    let p = pattern.as_bytes();
    let t = s.as_bytes();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Backtracking point: position of the last `*` seen and the text
    // position it is currently assumed to cover up to.
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(sp) = star {
            // Widen the last `*` by one byte and retry.
            pi = sp + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    // Trailing stars match the empty remainder.
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// True iff any of `patterns` matches `s`. An empty list matches nothing.
pub fn many_glob<S: AsRef<str>>(patterns: &[S], s: &str) -> bool {
    patterns.iter().any(|p| glob_match(p.as_ref(), s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(glob_match("example.com:443", "example.com:443"));
        assert!(!glob_match("example.com:443", "example.com:80"));
        assert!(!glob_match("example.com", "example.com:443"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything:443"));
        assert!(glob_match("*.example.com:80", "a.example.com:80"));
        assert!(glob_match("*.example.com:80", "a.b.example.com:80"));
        // `*` may match empty, so the bare suffix matches too.
        assert!(glob_match("*.example.com:80", ".example.com:80"));
        assert!(!glob_match("*.example.com:80", "example.com:80"));
    }

    #[test]
    fn star_in_the_middle_and_multiple_stars() {
        assert!(glob_match("api.*.svc:443", "api.prod.svc:443"));
        assert!(glob_match("*.foo.*", "a.foo.b"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }

    #[test]
    fn backtracking_over_repeated_prefixes() {
        assert!(glob_match("*ab", "aab"));
        assert!(glob_match("*aab", "aaab"));
        assert!(!glob_match("*aab", "aba"));
    }

    #[test]
    fn many_glob_first_match_wins_and_empty_denies() {
        let patterns = ["*.example.com:80", "exact.test:80"];
        assert!(many_glob(&patterns, "www.example.com:80"));
        assert!(many_glob(&patterns, "exact.test:80"));
        assert!(!many_glob(&patterns, "evil.test:80"));
        let empty: [&str; 0] = [];
        assert!(!many_glob(&empty, "anything"));
    }
}
