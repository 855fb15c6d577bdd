use crate::error::SpodrError;
use std::borrow::Cow;

/// Where the manifest and artifact for a requested range come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    Registry { range: String },
    Git(GitSpec),
    Remote { url: String },
}

/// A repository on a known git host, optionally at a committish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSpec {
    pub owner: String,
    pub repo: String,
    pub reference: Option<String>,
}

impl PackageSpec {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let Some(rest) = trimmed.strip_prefix("github:") {
            if let Some(spec) = parse_github_shorthand(rest) {
                return PackageSpec::Git(spec);
            }
        }

        if let Some(spec) = parse_github_url(trimmed) {
            return PackageSpec::Git(spec);
        }

        if let Some(spec) = parse_github_shorthand(trimmed) {
            return PackageSpec::Git(spec);
        }

        if is_http_url(trimmed) {
            return PackageSpec::Remote { url: trimmed.to_string() };
        }

        PackageSpec::Registry { range: trimmed.to_string() }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, PackageSpec::Registry { .. })
    }
}

/// The package and range behind an `npm:<name>@<range>` alias, if `raw` is one.
pub fn alias_target(raw: &str) -> Option<(String, String)> {
    let rest = raw.trim().strip_prefix("npm:")?;
    parse_tag(rest).ok()
}

/// Split a `name@range` tag. Scoped names keep their leading `@`; a bare
/// name requests any version.
pub fn parse_tag(tag: &str) -> Result<(String, String), SpodrError> {
    let tag = tag.trim();
    let search_from = usize::from(tag.starts_with('@'));
    let (name, range) = match tag[search_from..].find('@') {
        Some(idx) => {
            let split = idx + search_from;
            (&tag[..split], &tag[split + 1..])
        }
        None => (tag, "*"),
    };
    if name.is_empty() || name == "@" || (name.starts_with('@') && !name.contains('/')) {
        return Err(SpodrError::InvalidTag(tag.to_string()));
    }
    let range = if range.trim().is_empty() { "*" } else { range };
    Ok((name.to_string(), range.to_string()))
}

fn parse_github_shorthand(input: &str) -> Option<GitSpec> {
    if input.starts_with('@') || input.contains(' ') || input.contains(':') {
        return None;
    }

    let (path, reference) = split_committish(input);

    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() || parts.next().is_some() {
        return None;
    }
    // "1.0.0/2" and friends are not repositories.
    if owner.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '^' | '~' | '<' | '>' | '=')) {
        return None;
    }

    Some(GitSpec {
        owner: owner.to_string(),
        repo: repo.trim_end_matches(".git").to_string(),
        reference,
    })
}

fn parse_github_url(input: &str) -> Option<GitSpec> {
    let rest = input.strip_prefix("git+").unwrap_or(input);
    let rest = rest
        .strip_prefix("https://")
        .or_else(|| rest.strip_prefix("http://"))
        .or_else(|| rest.strip_prefix("ssh://git@"))
        .or_else(|| rest.strip_prefix("git://"))?;
    let path = rest.strip_prefix("github.com/")?;
    let (path, reference) = split_committish(path);
    // Plain https URLs only count as git when they point at a repository.
    if !input.starts_with("git") && !path.ends_with(".git") {
        return None;
    }
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim().trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(GitSpec { owner: owner.to_string(), repo: repo.to_string(), reference })
}

fn split_committish(input: &str) -> (&str, Option<String>) {
    match input.split_once('#') {
        Some((lhs, rhs)) if !rhs.trim().is_empty() => (lhs, Some(rhs.trim().to_string())),
        Some((lhs, _)) => (lhs, None),
        None => (input, None),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl GitSpec {
    pub fn committish(&self) -> Cow<'_, str> {
        self.reference.as_deref().map(Cow::Borrowed).unwrap_or(Cow::Borrowed("HEAD"))
    }

    pub fn tarball_url(&self) -> String {
        format!(
            "https://codeload.github.com/{}/{}/tar.gz/{}",
            self.owner,
            self.repo,
            self.committish()
        )
    }

    pub fn manifest_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/package.json",
            self.owner,
            self.repo,
            self.committish()
        )
    }
}
