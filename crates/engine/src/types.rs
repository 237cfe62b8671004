use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── Identity and scope ───────────────────────────────────────────────────────

/// The key a skill is installed under: a sanitized name, optionally grouped
/// by a namespace derived from the originating source so unrelated skills
/// can't collide on a bare name.
///
/// Both segments are restricted to `[a-z0-9._-]`, bounded to 255 chars, and
/// individually containment-checked before any filesystem write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl SkillIdentity {
    /// Build an identity from untrusted inputs, sanitizing both segments.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(crate::sanitize::sanitize),
            name: crate::sanitize::sanitize(name),
        }
    }
}

impl std::fmt::Display for SkillIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Where an installation lands: the current project directory or the user's
/// home directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallScope {
    Project,
    Global,
}

/// The single authoritative on-disk copy of a skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEntry {
    pub identity: SkillIdentity,
    pub path: PathBuf,
}

// ── Ledger document ──────────────────────────────────────────────────────────

/// Kind of source a skill was resolved from. Determines namespace derivation
/// and whether updates can be checked remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Github,
    Gitlab,
    Git,
    Registry,
    Url,
    Local,
}

impl SourceType {
    /// Whether this source exposes a tree-hash-like remote identity that
    /// `check_for_updates` can query without re-downloading.
    #[must_use]
    pub fn supports_remote_identity(self) -> bool {
        matches!(self, Self::Github)
    }
}

/// Provenance record for one installed skill, keyed by name in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Raw source string as the user gave it.
    pub source: String,
    pub source_type: SourceType,
    pub source_url: String,
    /// Path of the skill directory inside the source tree, when the source
    /// contained more than one skill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_path_in_source: Option<String>,
    /// Content hash: sha256 of SKILL.md for local sources, or the remote tree
    /// hash of the skill's subtree for version-controlled sources.
    pub content_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub installed_at_ms: u64,
    pub updated_at_ms: u64,
}

/// The versioned lockfile document. A document whose `version` is below the
/// current constant is discarded wholesale on load — no field migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    #[serde(default)]
    pub skills: std::collections::BTreeMap<String, LedgerEntry>,
}

// ── Operation results ────────────────────────────────────────────────────────

/// Outcome of presenting one canonical entry into one agent's directory.
/// Failures stay per-agent; one agent's error never aborts the fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct PresentationResult {
    pub agent: String,
    pub path: PathBuf,
    pub success: bool,
    /// Link creation failed and a physical copy was written instead. Degraded
    /// but successful.
    pub used_fallback_copy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PresentationResult {
    #[must_use]
    pub fn ok(agent: impl Into<String>, path: PathBuf, used_fallback_copy: bool) -> Self {
        Self {
            agent: agent.into(),
            path,
            success: true,
            used_fallback_copy,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(agent: impl Into<String>, path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            path,
            success: false,
            used_fallback_copy: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of removing one presentation from one agent's directory. A missing
/// presentation is success; a locked one is a per-agent failure that never
/// aborts the rest of the removal.
#[derive(Debug, Clone, Serialize)]
pub struct RemovalResult {
    pub agent: String,
    pub path: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a skill shows up inside one agent's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Symlink resolving to the canonical entry.
    Linked,
    /// Physical directory (fallback copy, or the canonical entry itself when
    /// the agent's directory coincides with the canonical root).
    Copied,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentLinkState {
    pub agent: String,
    pub path: PathBuf,
    pub status: LinkStatus,
}

/// One row of `list`: an installed skill with its per-agent presentation
/// status.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledSkill {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub canonical_path: PathBuf,
    pub source: String,
    pub source_type: SourceType,
    pub agents: Vec<AgentLinkState>,
}

/// Result of an update probe for one ledger entry.
///
/// `Unchecked` is deliberately distinct from `UpToDate`: a source without
/// remote tree semantics was not queried, which is not the same claim as
/// "checked, no update".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    UpToDate,
    UpdateAvailable,
    Unchecked,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub name: String,
    pub status: UpdateStatus,
}
