//! Resolved-source representation.
//!
//! Provider-specific URL grammar (refs, tarball endpoints, registry
//! protocols) lives with the caller that materializes sources; the engine
//! only needs the source's kind, a display URL, and a namespace hint. A
//! minimal `owner/repo` / GitHub-URL recognizer is provided so the CLI can
//! classify the common cases.

use std::path::PathBuf;

use crate::{
    error::{Error, Result},
    sanitize::sanitize,
    types::SourceType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    Github,
    Gitlab,
    Other,
}

/// A resolved skill source. A sum type rather than a bag of optional fields
/// so every consumer handles each kind exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSource {
    Local {
        path: PathBuf,
    },
    Git {
        provider: GitProvider,
        url: String,
        reference: Option<String>,
        subpath: Option<String>,
    },
    Registry {
        package: String,
    },
    Url {
        url: String,
    },
}

impl ParsedSource {
    #[must_use]
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Local { .. } => SourceType::Local,
            Self::Git { provider, .. } => match provider {
                GitProvider::Github => SourceType::Github,
                GitProvider::Gitlab => SourceType::Gitlab,
                GitProvider::Other => SourceType::Git,
            },
            Self::Registry { .. } => SourceType::Registry,
            Self::Url { .. } => SourceType::Url,
        }
    }

    #[must_use]
    pub fn source_url(&self) -> String {
        match self {
            Self::Local { path } => path.display().to_string(),
            Self::Git { url, .. } | Self::Url { url } => url.clone(),
            Self::Registry { package } => package.clone(),
        }
    }

    /// Namespace grouping for installed skills, derived from the origin so
    /// same-named skills from different sources don't collide. Local sources
    /// get none, which keeps pre-namespace installs addressable.
    #[must_use]
    pub fn namespace_hint(&self) -> Option<String> {
        match self {
            Self::Local { .. } => None,
            Self::Git { url, .. } => owner_of(url).map(|o| sanitize(&o)),
            Self::Registry { package } => {
                // Scoped packages group by scope, bare ones by package name.
                let ns = package
                    .strip_prefix('@')
                    .and_then(|rest| rest.split('/').next())
                    .unwrap_or(package);
                Some(sanitize(ns))
            },
            Self::Url { url } => host_of(url).map(|h| sanitize(&h)),
        }
    }
}

/// Classify a raw source string. Accepts `owner/repo`, GitHub/GitLab URLs
/// (with optional trailing slash or `.git`), other http(s) URLs, and local
/// paths.
pub fn parse_source(raw: &str) -> Result<ParsedSource> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::message("empty source"));
    }

    // Explicit local paths first; also anything that exists on disk.
    if s.starts_with('/') || s.starts_with("./") || s.starts_with("../") || s.starts_with("~/") {
        return Ok(ParsedSource::Local {
            path: PathBuf::from(s),
        });
    }
    if std::path::Path::new(s).exists() {
        return Ok(ParsedSource::Local {
            path: PathBuf::from(s),
        });
    }

    if let Some(rest) = strip_host(s, "github.com") {
        return git_from_parts(GitProvider::Github, "https://github.com", rest);
    }
    if let Some(rest) = strip_host(s, "gitlab.com") {
        return git_from_parts(GitProvider::Gitlab, "https://gitlab.com", rest);
    }
    if s.starts_with("https://") || s.starts_with("http://") {
        if s.ends_with(".git") {
            return Ok(ParsedSource::Git {
                provider: GitProvider::Other,
                url: s.to_string(),
                reference: None,
                subpath: None,
            });
        }
        return Ok(ParsedSource::Url { url: s.to_string() });
    }

    // Bare `owner/repo` shorthand means GitHub.
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        return git_from_parts(GitProvider::Github, "https://github.com", s);
    }

    Err(Error::message(format!(
        "unrecognized source '{raw}': expected a local path, owner/repo, or URL"
    )))
}

fn git_from_parts(provider: GitProvider, base: &str, rest: &str) -> Result<ParsedSource> {
    let rest = rest.trim_matches('/').trim_end_matches(".git");
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().unwrap_or_default();
    let repo = parts.next().unwrap_or_default();
    if owner.is_empty() || repo.is_empty() {
        return Err(Error::message(format!(
            "invalid git source '{rest}': expected 'owner/repo'"
        )));
    }
    Ok(ParsedSource::Git {
        provider,
        url: format!("{base}/{owner}/{repo}"),
        reference: None,
        subpath: parts.next().map(ToOwned::to_owned),
    })
}

fn strip_host<'a>(s: &'a str, host: &str) -> Option<&'a str> {
    s.strip_prefix(&format!("https://{host}/"))
        .or_else(|| s.strip_prefix(&format!("http://{host}/")))
        .or_else(|| s.strip_prefix(&format!("{host}/")))
}

/// `owner` segment of a forge URL (`https://host/owner/repo`).
fn owner_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let mut parts = rest.split('/').filter(|p| !p.is_empty());
    let _host = parts.next()?;
    parts.next().map(ToOwned::to_owned)
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    rest.split('/').next().map(ToOwned::to_owned)
}

/// `(owner, repo)` of a GitHub/GitLab source URL.
#[must_use]
pub fn owner_repo(url: &str) -> Option<(String, String)> {
    let rest = url.split("://").nth(1)?;
    let mut parts = rest.split('/').filter(|p| !p.is_empty());
    let _host = parts.next()?;
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.trim_end_matches(".git").to_string();
    Some((owner, repo))
}
