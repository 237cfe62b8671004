//! Per-agent presentation of canonical entries.
//!
//! Each selected agent gets the skill inside its own skills directory:
//! a relative symlink to the canonical entry where the platform allows it,
//! a physical copy otherwise. Stale links are replaced, self-referential
//! links are impossible by construction, and failures stay per-agent.

use std::path::{Component, Path, PathBuf};

use skillcast_common::fsx;

use crate::{
    error::{Error, Result},
    sanitize::{checked_join, lexical_absolute},
    store::{CopyFilter, copy_dir},
    types::{CanonicalEntry, LinkStatus, PresentationResult},
};

/// Present a canonical entry inside one agent's skills directory.
///
/// Never returns early across agents: every failure is folded into the
/// [`PresentationResult`] so the caller can keep fanning out.
pub async fn present(
    entry: &CanonicalEntry,
    agent_id: &str,
    skills_dir: &Path,
) -> PresentationResult {
    match try_present(entry, skills_dir).await {
        Ok((path, used_fallback_copy)) => {
            if used_fallback_copy {
                tracing::warn!(
                    agent = agent_id,
                    path = %path.display(),
                    "symlink unavailable, wrote physical copy"
                );
            }
            PresentationResult::ok(agent_id, path, used_fallback_copy)
        },
        Err(e) => {
            tracing::warn!(agent = agent_id, skill = %entry.identity, %e, "presentation failed");
            PresentationResult::failed(agent_id, skills_dir.join(&entry.identity.name), e.to_string())
        },
    }
}

async fn try_present(entry: &CanonicalEntry, skills_dir: &Path) -> Result<(PathBuf, bool)> {
    let agent_path = checked_join(skills_dir, &entry.identity.name)?;
    let canonical_abs = lexical_absolute(&entry.path)?;
    let coincides = lexical_absolute(&agent_path)? == canonical_abs;

    if fsx::exists(&agent_path) {
        if fsx::is_symlink(&agent_path) {
            let resolved = fsx::resolve_target(&agent_path);
            let canonical_physical = std::fs::canonicalize(&entry.path).ok();
            if resolved.is_some() && resolved == canonical_physical {
                return Ok((agent_path, false));
            }
            // Stale, dangling, or self-referential link: replace it.
            fsx::remove_any(&agent_path)?;
        } else {
            // The agent's skills directory may be the canonical root itself,
            // or reach it through a symlinked parent. Either way the real
            // directory written by materialize IS the presentation; removing
            // it as "stale" would destroy the canonical entry.
            let physically_canonical = match (
                std::fs::canonicalize(&agent_path),
                std::fs::canonicalize(&entry.path),
            ) {
                (Ok(a), Ok(c)) => a == c,
                _ => false,
            };
            if coincides || physically_canonical {
                return Ok((agent_path, false));
            }
            fsx::remove_any(&agent_path).map_err(|e| crate::store::map_busy(&agent_path, e))?;
        }
    }

    if coincides {
        // Nothing occupies the path (a squatting link was just removed) but
        // the canonical entry is supposed to live here; restore it rather
        // than creating a zero-length self-link.
        return Err(Error::message(format!(
            "canonical entry missing at {}",
            agent_path.display()
        )));
    }

    let parent = agent_path
        .parent()
        .ok_or_else(|| Error::message("agent path has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;

    // Resolve one extra level of indirection: if the agent's whole config
    // directory is itself a symlink, the link must be computed from the
    // physical parent or it would dangle (or loop back into itself).
    let physical_parent = std::fs::canonicalize(parent)?;
    let canonical_physical = std::fs::canonicalize(&entry.path)?;
    if physical_parent.join(&entry.identity.name) == canonical_physical {
        // Through the resolved parent the link would point at itself; the
        // only loop-free presentation here is a real copy.
        copy_dir(&entry.path, &agent_path, CopyFilter::Verbatim).await?;
        return Ok((agent_path, true));
    }

    let link_target = relative_from(&canonical_physical, &physical_parent);
    match make_symlink(&link_target, &agent_path).await {
        Ok(()) => Ok((agent_path, false)),
        Err(e) => {
            // LinkUnsupported: privilege, filesystem, or platform refusal.
            // Degrade to a physical copy; never fatal.
            tracing::debug!(%e, path = %agent_path.display(), "symlink failed, copying");
            copy_dir(&entry.path, &agent_path, CopyFilter::Verbatim).await?;
            Ok((agent_path, true))
        },
    }
}

/// Remove an agent-side presentation (link or copy).
///
/// Missing paths are success. Other I/O failures (locked or read-only
/// directories map to [`Error::ResourceBusy`]) are returned so the caller can
/// report them per agent; they never halt a batch removal.
pub async fn unpresent(agent_id: &str, skills_dir: &Path, name: &str) -> Result<PathBuf> {
    let agent_path = checked_join(skills_dir, name)?;
    match fsx::remove_any(&agent_path) {
        Ok(()) => {
            tracing::debug!(agent = agent_id, path = %agent_path.display(), "removed presentation");
            Ok(agent_path)
        },
        Err(e) => {
            tracing::warn!(
                agent = agent_id,
                path = %agent_path.display(),
                %e,
                "failed to remove presentation"
            );
            Err(crate::store::map_busy(&agent_path, e))
        },
    }
}

/// How (and whether) a skill shows up in one agent's skills directory.
#[must_use]
pub fn presentation_status(skills_dir: &Path, name: &str, canonical: &Path) -> LinkStatus {
    let agent_path = skills_dir.join(name);
    if fsx::is_symlink(&agent_path) {
        let resolved = fsx::resolve_target(&agent_path);
        if resolved.is_some() && resolved == std::fs::canonicalize(canonical).ok() {
            return LinkStatus::Linked;
        }
        return LinkStatus::Missing;
    }
    if agent_path.is_dir() {
        return LinkStatus::Copied;
    }
    LinkStatus::Missing
}

/// Whether the presentation at `skills_dir/name` still resolves to the
/// canonical entry — a symlink into it, or the canonical directory itself
/// when the roots coincide. Fallback copies are independent and do not hold
/// a reference.
#[must_use]
pub fn references_canonical(skills_dir: &Path, name: &str, canonical: &Path) -> bool {
    let agent_path = skills_dir.join(name);
    if fsx::is_symlink(&agent_path) {
        let resolved = fsx::resolve_target(&agent_path);
        return resolved.is_some() && resolved == std::fs::canonicalize(canonical).ok();
    }
    if agent_path.is_dir() {
        return match (lexical_absolute(&agent_path), lexical_absolute(canonical)) {
            (Ok(a), Ok(c)) => a == c,
            _ => false,
        };
    }
    false
}

/// Relative path from `base` (a directory) to `target`. Both must be
/// absolute and lexically normalized.
fn relative_from(target: &Path, base: &Path) -> PathBuf {
    let target_comps: Vec<Component> = target.components().collect();
    let base_comps: Vec<Component> = base.components().collect();

    let common = target_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_comps.len() {
        rel.push("..");
    }
    for comp in &target_comps[common..] {
        rel.push(comp.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

#[cfg(unix)]
async fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    // Directory symlink; NTFS junctions need an absolute target, so this
    // requires developer mode or symlink privilege — failure falls back to a
    // physical copy at the call site.
    tokio::fs::symlink_dir(target, link).await
}
