use anyhow::{anyhow, Result};
use semver::{Version, VersionReq};
use std::str::FromStr;

/// An npm range, parsed into its `||`-separated alternatives.
#[derive(Debug, Clone)]
pub struct RangeSet {
    reqs: Vec<VersionReq>,
}

impl RangeSet {
    pub fn parse(range: &str) -> Result<Self> {
        let mut reqs = Vec::new();
        for part in range.split("||").map(str::trim) {
            let norm = canonicalize_npm_range(part);
            if norm == "*" {
                reqs.push(VersionReq::STAR);
                continue;
            }
            let req = VersionReq::from_str(&norm).map_err(|e| {
                anyhow!("invalid semver range '{}' (orig '{}'): {}", norm, part, e)
            })?;
            reqs.push(req);
        }
        if reqs.is_empty() {
            return Err(anyhow!("empty range '{}'", range));
        }
        Ok(Self { reqs })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.reqs.iter().any(|r| r.matches(version))
    }
}

pub fn parse_version(version: &str) -> Option<Version> {
    let v = version.trim();
    let v = v.strip_prefix('=').unwrap_or(v);
    let v = v.strip_prefix('v').unwrap_or(v);
    Version::parse(v).ok()
}

/// Does `version` satisfy the npm `range`? Unparsable input only matches itself.
pub fn satisfies(version: &str, range: &str) -> bool {
    if version == range {
        return true;
    }
    let Some(ver) = parse_version(version) else {
        return false;
    };
    RangeSet::parse(range).map(|set| set.matches(&ver)).unwrap_or(false)
}

/// Highest of `versions` satisfying `range`.
pub fn max_satisfying<'a, I>(versions: I, range: &str) -> Result<Option<&'a str>>
where
    I: IntoIterator<Item = &'a str>,
{
    let set = RangeSet::parse(range)?;
    let mut best: Option<(Version, &'a str)> = None;
    for raw in versions {
        let Some(ver) = parse_version(raw) else { continue };
        if !set.matches(&ver) {
            continue;
        }
        if best.as_ref().map(|(b, _)| ver > *b).unwrap_or(true) {
            best = Some((ver, raw));
        }
    }
    Ok(best.map(|(_, raw)| raw))
}

pub fn canonicalize_npm_range(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() || s == "*" || s == "latest" || s == "x" || s == "X" {
        return "*".into();
    }

    if s.contains("||") {
        return s.to_string();
    }

    // A full version (including prerelease/build) is exact.
    if parse_version(s).is_some() && !s.starts_with(['^', '~', '<', '>']) {
        let bare = s.trim_start_matches('=').trim_start_matches('v');
        return format!("={bare}");
    }

    // Hyphen range: "1.2.3 - 2.3.4" => ">=1.2.3, <=2.3.4"
    if let Some(idx) = s.find(" - ") {
        let (a, b) = s.split_at(idx);
        let left = a.trim();
        let right = b[3..].trim();
        if is_version_like(left) && is_version_like(right) {
            return format!(">={left}, <={right}");
        }
    }

    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.len() > 1 {
        let mut comps: Vec<String> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = tokens[i];
            if is_op(t) {
                if let Some(ver) = tokens.get(i + 1) {
                    comps.push(format!("{t}{ver}"));
                    i += 2;
                    continue;
                }
                return s.to_string();
            }
            if is_version_like(t) || t.starts_with(['^', '~', '<', '>', '=']) {
                comps.push(canonicalize_single(t));
                i += 1;
                continue;
            }
            return s.to_string();
        }
        return comps.join(", ");
    }

    canonicalize_single(s)
}

fn canonicalize_single(t: &str) -> String {
    if t.contains('x') || t.contains('X') || t.contains('*') {
        return expand_wildcard(t);
    }
    if is_numeric(t) {
        return format!(">={t}.0.0, <{}.0.0", t.parse::<u64>().map(|m| m + 1).unwrap_or(0));
    }
    if count_dots(t) == 1 && t.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let mut parts = t.split('.');
        if let (Some(maj), Some(Ok(min))) = (parts.next(), parts.next().map(str::parse::<u64>)) {
            return format!(">={maj}.{min}.0, <{maj}.{}.0", min + 1);
        }
    }
    if parse_version(t).is_some() && !t.starts_with(['^', '~', '<', '>']) {
        return format!("={}", t.trim_start_matches('=').trim_start_matches('v'));
    }
    t.to_string()
}

fn is_op(t: &str) -> bool {
    matches!(t, ">" | "<" | ">=" | "<=" | "=" | "^" | "~")
}

fn is_numeric(t: &str) -> bool {
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

fn count_dots(t: &str) -> usize {
    t.chars().filter(|&c| c == '.').count()
}

fn is_version_like(t: &str) -> bool {
    let mut has_digit = false;
    for c in t.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if !matches!(c, '.' | '-' | '+' | 'x' | 'X' | '*' | 'a'..='z' | 'A'..='Z') {
            return false;
        }
    }
    has_digit
}

fn expand_wildcard(pattern: &str) -> String {
    // 1.x, 1.2.x, 1.*
    let parts: Vec<&str> = pattern.split('.').collect();
    let is_wild = |p: &str| p.eq_ignore_ascii_case("x") || p == "*";
    match parts.as_slice() {
        [maj, rest @ ..] if !rest.is_empty() && is_wild(rest[0]) => {
            if let Ok(maj) = maj.parse::<u64>() {
                return format!(">={maj}.0.0, <{}.0.0", maj + 1);
            }
        }
        [maj, min, patch] if is_wild(patch) => {
            if let (Ok(maj), Ok(min)) = (maj.parse::<u64>(), min.parse::<u64>()) {
                return format!(">={maj}.{min}.0, <{maj}.{}.0", min + 1);
            }
        }
        _ => {}
    }
    pattern.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_wildcards() {
        assert_eq!(canonicalize_npm_range("*"), "*");
        assert_eq!(canonicalize_npm_range("1.x"), ">=1.0.0, <2.0.0");
        assert_eq!(canonicalize_npm_range("1.2.x"), ">=1.2.0, <1.3.0");
    }

    #[test]
    fn hyphen() {
        assert_eq!(canonicalize_npm_range("1.2.3 - 2.3.4"), ">=1.2.3, <=2.3.4");
    }

    #[test]
    fn spaced_comparators() {
        let c = canonicalize_npm_range(">= 2.1.2 < 3.0.0");
        assert_eq!(c, ">=2.1.2, <3.0.0");
        assert!(VersionReq::parse(&c).is_ok());
    }

    #[test]
    fn inserts_comma_between_comparators() {
        let out = canonicalize_npm_range("^3.1.0 <4");
        assert_eq!(out, "^3.1.0, <4");
        assert!(VersionReq::parse(&out).is_ok());
    }

    #[test]
    fn exact_versions_are_pinned() {
        assert_eq!(canonicalize_npm_range("1.2.0"), "=1.2.0");
        assert_eq!(canonicalize_npm_range("v1.2.0"), "=1.2.0");
        assert_eq!(canonicalize_npm_range("^2.0.0"), "^2.0.0");
    }

    #[test]
    fn satisfies_npm_ranges() {
        assert!(satisfies("1.2.0", "^1.0.0"));
        assert!(!satisfies("2.0.0", "^1.0.0"));
        assert!(satisfies("2.5.1", "^1.0.0 || ^2.0.0"));
        assert!(satisfies("1.2.9", "1.2"));
        assert!(!satisfies("1.3.0", "1.2"));
        assert!(satisfies("1.0.0", "latest"));
        assert!(satisfies("not-semver", "not-semver"));
        assert!(!satisfies("not-semver", "^1.0.0"));
    }

    #[test]
    fn max_satisfying_picks_highest_match() {
        let versions = ["1.0.0", "1.4.2", "1.10.0", "2.0.0"];
        assert_eq!(max_satisfying(versions, "^1.0.0").unwrap(), Some("1.10.0"));
        assert_eq!(max_satisfying(versions, "~1.4.0").unwrap(), Some("1.4.2"));
        assert_eq!(max_satisfying(versions, "^3.0.0").unwrap(), None);
    }
}
