//! SKILL.md parsing.
//!
//! Every skill directory carries a `SKILL.md` with YAML frontmatter declaring
//! at minimum a name and description, per the Agent Skills open standard.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Context, Error, Result};

/// Manifest file name inside every skill directory.
pub const MANIFEST_FILE: &str = "SKILL.md";

/// Frontmatter of a SKILL.md, plus the directory it was read from.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: SkillManifestMetadata,
    /// Directory containing the manifest.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillManifestMetadata {
    /// Internal-only skills are hidden by discovery unless an environment
    /// flag opts in. The installer records it verbatim.
    #[serde(default)]
    pub internal: bool,
}

/// Validate a declared skill name: non-empty, ≤64 chars, lowercase
/// alphanumeric with single hyphens.
#[must_use]
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Parse SKILL.md content into a manifest.
///
/// The declared name is kept as-is here; callers sanitize it before it
/// becomes a path segment, so a manifest with a hostile name parses but can
/// never escape a base directory.
pub fn parse_manifest(content: &str, skill_dir: &Path) -> Result<SkillManifest> {
    let (frontmatter, _body) = split_frontmatter(content)?;
    let mut manifest: SkillManifest =
        serde_yaml::from_str(&frontmatter).context("invalid SKILL.md frontmatter")?;
    if manifest.name.trim().is_empty() {
        return Err(Error::message("SKILL.md frontmatter is missing 'name'"));
    }
    manifest.path = skill_dir.to_path_buf();
    Ok(manifest)
}

/// Read and parse `<dir>/SKILL.md`.
pub async fn read_manifest(skill_dir: &Path) -> Result<SkillManifest> {
    let manifest_path = skill_dir.join(MANIFEST_FILE);
    let content = tokio::fs::read_to_string(&manifest_path)
        .await
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    parse_manifest(&content, skill_dir)
}

/// Find every skill directory under `root`.
///
/// A root with its own SKILL.md is a single-skill source. Otherwise the tree
/// is walked with a work stack; a directory containing SKILL.md is a skill
/// and is not descended into further. Symlinks and VCS directories are
/// skipped, and a malformed SKILL.md skips that directory instead of failing
/// the scan.
pub async fn discover_skills(root: &Path) -> Result<Vec<SkillManifest>> {
    if root.join(MANIFEST_FILE).is_file() {
        return Ok(vec![read_manifest(root).await?]);
    }

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), %e, "skipping unreadable directory");
                continue;
            },
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if !file_type.is_dir() || file_type.is_symlink() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && (name.starts_with('.') || name.starts_with('_'))
            {
                continue;
            }
            if path.join(MANIFEST_FILE).is_file() {
                match read_manifest(&path).await {
                    Ok(manifest) => found.push(manifest),
                    Err(e) => {
                        tracing::debug!(dir = %path.display(), %e, "skipping malformed SKILL.md");
                    },
                }
            } else {
                pending.push(path);
            }
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

/// Split SKILL.md content at `---` delimiters into (frontmatter, body).
fn split_frontmatter(content: &str) -> Result<(String, String)> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return Err(Error::message(
            "SKILL.md must start with YAML frontmatter delimited by ---",
        ));
    }

    let after_open = &trimmed[3..];
    let close_pos = after_open
        .find("\n---")
        .context("SKILL.md missing closing --- for frontmatter")?;

    let frontmatter = after_open[..close_pos].trim().to_string();
    let body = after_open[close_pos + 4..].trim().to_string();
    Ok((frontmatter, body))
}
