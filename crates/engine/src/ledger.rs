//! Provenance ledger.
//!
//! A single versioned JSON document under the user's home directory mapping
//! installed skill names to source, content identity, and timestamps. Loading
//! a document with a stale schema version discards all entries — reinstalls
//! are cheap and idempotent, field-by-field migration is not worth its bugs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    agents::home_dir,
    error::Result,
    source::owner_repo,
    types::{Ledger, LedgerEntry, UpdateReport, UpdateStatus},
};

/// Current ledger schema version. Documents below this are wiped on load.
pub const LEDGER_VERSION: u32 = 2;

/// Ledger file name, next to the global canonical root: `~/.agents/skills-lock.json`.
pub const LEDGER_FILE: &str = "skills-lock.json";

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            skills: std::collections::BTreeMap::new(),
        }
    }
}

/// Persistent ledger storage with atomic writes.
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join(".agents").join(LEDGER_FILE))
    }

    /// Load the ledger, recovering to an empty current-version document on a
    /// missing file, malformed JSON, or a stale schema version. Never a fatal
    /// startup error.
    pub fn load(&self) -> Result<Ledger> {
        if !self.path.exists() {
            return Ok(Ledger::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let ledger: Ledger = match serde_json::from_str(&data) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(%e, path = %self.path.display(), "corrupt ledger, starting fresh");
                return Ok(Ledger::default());
            },
        };
        if ledger.version < LEDGER_VERSION {
            tracing::warn!(
                found = ledger.version,
                current = LEDGER_VERSION,
                "stale ledger schema, discarding entries"
            );
            return Ok(Ledger::default());
        }
        Ok(ledger)
    }

    /// Save the whole document atomically via temp file + rename.
    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(ledger)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Merge one entry into the document. The first-install timestamp is
    /// sticky: a re-record keeps the prior `installed_at_ms` and refreshes
    /// only `updated_at_ms`.
    pub fn record(&self, name: &str, mut entry: LedgerEntry) -> Result<()> {
        let mut ledger = self.load()?;
        let now = now_ms();
        entry.updated_at_ms = now;
        entry.installed_at_ms = match ledger.skills.get(name) {
            Some(prior) => prior.installed_at_ms,
            None => now,
        };
        ledger.skills.insert(name.to_string(), entry);
        self.save(&ledger)
    }

    /// Delete an entry. Idempotent: a missing name is success.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut ledger = self.load()?;
        let existed = ledger.skills.remove(name).is_some();
        if existed {
            self.save(&ledger)?;
        }
        Ok(existed)
    }

    pub fn get(&self, name: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.load()?.skills.get(name).cloned())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Update checking ─────────────────────────────────────────────────────────

/// Fetches the current remote content identity for a ledger entry.
///
/// A trait so update checking is testable without the network; `None` means
/// the remote could not be queried, which surfaces as `Unchecked`.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn remote_identity(&self, entry: &LedgerEntry) -> Option<String>;
}

/// GitHub-backed probe: latest commit touching the skill's path in the
/// source tree.
pub struct GithubProbe {
    client: reqwest::Client,
}

impl GithubProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GithubProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Commits-endpoint URL for an entry, or `None` when the source URL has no
/// `owner/repo` shape. The path filter is percent-encoded.
fn github_commits_url(entry: &LedgerEntry) -> Option<String> {
    let (owner, repo) = owner_repo(&entry.source_url)?;
    let mut url = format!("https://api.github.com/repos/{owner}/{repo}/commits?per_page=1");
    if let Some(path) = &entry.skill_path_in_source {
        url.push_str("&path=");
        url.push_str(&urlencoding::encode(path));
    }
    Some(url)
}

#[async_trait]
impl IdentityProbe for GithubProbe {
    async fn remote_identity(&self, entry: &LedgerEntry) -> Option<String> {
        let url = github_commits_url(entry)?;
        let response = self
            .client
            .get(url)
            .header("User-Agent", "skillcast")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let value: serde_json::Value = response.json().await.ok()?;
        value
            .as_array()?
            .first()?
            .get("sha")?
            .as_str()
            .filter(|sha| sha.len() == 40)
            .map(ToOwned::to_owned)
    }
}

/// Compare stored content identities against the remote for every entry.
///
/// Sources without remote tree semantics are reported `Unchecked` — a
/// different claim than "checked, no update". Probes for different entries
/// run concurrently; they touch no shared state.
pub async fn check_for_updates(ledger: &Ledger, probe: &dyn IdentityProbe) -> Vec<UpdateReport> {
    let futures = ledger.skills.iter().map(|(name, entry)| async move {
        let status = if !entry.source_type.supports_remote_identity() {
            UpdateStatus::Unchecked
        } else {
            match probe.remote_identity(entry).await {
                Some(remote) if remote == entry.content_identity => UpdateStatus::UpToDate,
                Some(_) => UpdateStatus::UpdateAvailable,
                None => UpdateStatus::Unchecked,
            }
        };
        UpdateReport {
            name: name.clone(),
            status,
        }
    });
    futures::future::join_all(futures).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;

    fn entry(source_type: SourceType, identity: &str) -> LedgerEntry {
        LedgerEntry {
            source: "owner/repo".into(),
            source_type,
            source_url: "https://github.com/owner/repo".into(),
            skill_path_in_source: Some("skills/alpha".into()),
            content_identity: identity.into(),
            namespace: None,
            installed_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn test_load_missing_returns_current_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(tmp.path().join("missing.json"));
        let ledger = store.load().unwrap();
        assert_eq!(ledger.version, LEDGER_VERSION);
        assert!(ledger.skills.is_empty());
    }

    #[test]
    fn test_load_malformed_returns_current_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();
        let ledger = LedgerStore::new(path).load().unwrap();
        assert_eq!(ledger.version, LEDGER_VERSION);
        assert!(ledger.skills.is_empty());
    }

    #[test]
    fn test_stale_version_wipes_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{"version":1,"skills":{"alpha":{"source":"a/b","source_type":"local",
                "source_url":"/tmp/a","content_identity":"x",
                "installed_at_ms":1,"updated_at_ms":1}}}"#,
        )
        .unwrap();
        let ledger = LedgerStore::new(path).load().unwrap();
        assert_eq!(ledger.version, LEDGER_VERSION);
        assert!(ledger.skills.is_empty(), "v1 entries must be discarded");
    }

    #[test]
    fn test_record_preserves_first_install_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(tmp.path().join("ledger.json"));

        store.record("alpha", entry(SourceType::Local, "v1")).unwrap();
        let first = store.get("alpha").unwrap().unwrap();
        assert!(first.installed_at_ms > 0);
        assert_eq!(first.installed_at_ms, first.updated_at_ms);

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.record("alpha", entry(SourceType::Local, "v2")).unwrap();
        let second = store.get("alpha").unwrap().unwrap();
        assert_eq!(second.installed_at_ms, first.installed_at_ms);
        assert!(second.updated_at_ms > first.updated_at_ms);
        assert_eq!(second.content_identity, "v2");

        // Re-recording never duplicates the key.
        assert_eq!(store.load().unwrap().skills.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(tmp.path().join("ledger.json"));
        store.record("alpha", entry(SourceType::Local, "v1")).unwrap();

        assert!(store.remove("alpha").unwrap());
        assert!(!store.remove("alpha").unwrap());
        assert!(store.get("alpha").unwrap().is_none());
    }

    #[test]
    fn test_commits_url_percent_encodes_path_filter() {
        let mut e = entry(SourceType::Github, "x");
        e.skill_path_in_source = Some("skills/a&b #1/do it".into());
        let url = github_commits_url(&e).unwrap();
        assert_eq!(
            url,
            "https://api.github.com/repos/owner/repo/commits?per_page=1\
             &path=skills%2Fa%26b%20%231%2Fdo%20it"
        );

        e.skill_path_in_source = None;
        assert_eq!(
            github_commits_url(&e).unwrap(),
            "https://api.github.com/repos/owner/repo/commits?per_page=1"
        );

        e.source_url = "not a url".into();
        assert!(github_commits_url(&e).is_none());
    }

    struct StubProbe {
        identity: Option<&'static str>,
    }

    #[async_trait]
    impl IdentityProbe for StubProbe {
        async fn remote_identity(&self, _entry: &LedgerEntry) -> Option<String> {
            self.identity.map(ToOwned::to_owned)
        }
    }

    #[tokio::test]
    async fn test_update_check_distinguishes_unchecked() {
        let mut ledger = Ledger::default();
        ledger
            .skills
            .insert("local".into(), entry(SourceType::Local, "x"));
        ledger
            .skills
            .insert("stale".into(), entry(SourceType::Github, "old"));
        ledger
            .skills
            .insert("fresh".into(), entry(SourceType::Github, "same"));

        let probe = StubProbe {
            identity: Some("same"),
        };
        let reports = check_for_updates(&ledger, &probe).await;
        let by_name = |n: &str| {
            reports
                .iter()
                .find(|r| r.name == n)
                .map(|r| r.status.clone())
                .unwrap()
        };
        assert_eq!(by_name("local"), UpdateStatus::Unchecked);
        assert_eq!(by_name("stale"), UpdateStatus::UpdateAvailable);
        assert_eq!(by_name("fresh"), UpdateStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_update_check_unreachable_remote_is_unchecked() {
        let mut ledger = Ledger::default();
        ledger
            .skills
            .insert("gone".into(), entry(SourceType::Github, "old"));
        let probe = StubProbe { identity: None };
        let reports = check_for_updates(&ledger, &probe).await;
        assert_eq!(reports[0].status, UpdateStatus::Unchecked);
    }
}
