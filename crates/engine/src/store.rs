//! Canonical skill store.
//!
//! One deduplicated on-disk directory per installed skill identity, under
//! `<scope-base>/.agents/skills/[<namespace>/]<name>`. All agent
//! presentations resolve to this copy.

use std::path::{Path, PathBuf};

use skillcast_common::fsx;

use crate::{
    error::{Error, Result},
    manifest::MANIFEST_FILE,
    sanitize::{assert_contained, checked_join, lexical_absolute},
    types::{CanonicalEntry, SkillIdentity},
};

/// Canonical root relative to a scope base (project dir or home dir).
pub const CANONICAL_SUBDIR: &str = ".agents/skills";

/// Directories never copied into the canonical store.
const EXCLUDED_DIRS: &[&str] = &[".git", ".svn", ".hg"];

/// Files never copied into the canonical store.
const EXCLUDED_FILES: &[&str] = &[
    "README.md",
    "metadata.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
    "uv.lock",
];

fn is_excluded(name: &str) -> bool {
    name.starts_with('_') || EXCLUDED_DIRS.contains(&name) || EXCLUDED_FILES.contains(&name)
}

/// What the copier filters out of the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyFilter {
    /// Apply the canonical exclusion set (VCS dirs, lockfiles, underscore
    /// files, README.md, metadata.json).
    CanonicalExclusions,
    /// Copy everything. Used for fallback copies of an already-filtered
    /// canonical entry.
    Verbatim,
}

pub struct CanonicalStore {
    root: PathBuf,
}

impl CanonicalStore {
    /// Store rooted at `<scope_base>/.agents/skills`.
    #[must_use]
    pub fn new(scope_base: &Path) -> Self {
        Self {
            root: scope_base.join(CANONICAL_SUBDIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for an identity, containment-checking the namespace and
    /// name segments independently so neither can smuggle the other out of
    /// the root.
    pub fn entry_path(&self, identity: &SkillIdentity) -> Result<PathBuf> {
        let parent = match &identity.namespace {
            Some(ns) => checked_join(&self.root, ns)?,
            None => lexical_absolute(&self.root)?,
        };
        let path = checked_join(&parent, &identity.name)?;
        assert_contained(&self.root, &path)
    }

    /// Copy `source_dir` into the canonical location for `identity`.
    ///
    /// Idempotent: byte-identical existing content is an immediate success;
    /// differing content requires `overwrite` or fails with
    /// [`Error::Conflict`]. Overwrites replace the destination in place with
    /// no rollback — a crash mid-copy leaves a partial entry, which the next
    /// install repairs.
    pub async fn materialize(
        &self,
        identity: &SkillIdentity,
        source_dir: &Path,
        overwrite: bool,
    ) -> Result<CanonicalEntry> {
        let dest = self.entry_path(identity)?;

        if fsx::exists(&dest) {
            if dest.is_dir() && !fsx::is_symlink(&dest) {
                let existing = tree_hash(&dest)?;
                let incoming = tree_hash(source_dir)?;
                if existing == incoming {
                    tracing::debug!(skill = %identity, "canonical entry already up to date");
                    return Ok(CanonicalEntry {
                        identity: identity.clone(),
                        path: dest,
                    });
                }
                if !overwrite {
                    return Err(Error::Conflict { path: dest });
                }
            }
            // Differing directory, stale symlink, or stray file: replace.
            fsx::remove_any(&dest).map_err(|e| map_busy(&dest, e))?;
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        copy_dir(source_dir, &dest, CopyFilter::CanonicalExclusions).await?;

        tracing::info!(skill = %identity, path = %dest.display(), "materialized canonical entry");
        Ok(CanonicalEntry {
            identity: identity.clone(),
            path: dest,
        })
    }

    /// Delete the canonical entry when nothing references it anymore.
    ///
    /// The caller establishes `still_referenced_by` by probing the filesystem
    /// for remaining agent presentations; this check is advisory — there is
    /// no live reference count.
    pub async fn release_if_unreferenced(
        &self,
        identity: &SkillIdentity,
        still_referenced_by: &[String],
    ) -> Result<bool> {
        if !still_referenced_by.is_empty() {
            tracing::debug!(
                skill = %identity,
                agents = ?still_referenced_by,
                "canonical entry still referenced, keeping"
            );
            return Ok(false);
        }

        let dest = self.entry_path(identity)?;
        if !fsx::exists(&dest) {
            return Ok(false);
        }
        fsx::remove_any(&dest).map_err(|e| map_busy(&dest, e))?;

        // Drop the namespace directory too once it's empty.
        if identity.namespace.is_some()
            && let Some(parent) = dest.parent()
            && let Ok(mut entries) = tokio::fs::read_dir(parent).await
            && entries.next_entry().await.ok().flatten().is_none()
        {
            let _ = tokio::fs::remove_dir(parent).await;
        }

        tracing::info!(skill = %identity, "released canonical entry");
        Ok(true)
    }
}

/// Map lock/permission failures to the per-item `ResourceBusy` status so a
/// batch removal can skip the item instead of aborting.
pub(crate) fn map_busy(path: &Path, source: std::io::Error) -> Error {
    match source.kind() {
        std::io::ErrorKind::ResourceBusy | std::io::ErrorKind::PermissionDenied => {
            Error::ResourceBusy {
                path: path.to_path_buf(),
                source,
            }
        },
        _ => Error::Io(source),
    }
}

/// Recursive directory copy over an explicit work stack.
///
/// Symlinked entries are skipped (a symlink pointing into the destination
/// tree would otherwise loop), and source directories that lexically fall
/// inside the destination are not descended into.
pub(crate) async fn copy_dir(src: &Path, dst: &Path, filter: CopyFilter) -> Result<()> {
    let dst_abs = lexical_absolute(dst)?;
    tokio::fs::create_dir_all(dst).await?;

    let mut stack: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if filter == CopyFilter::CanonicalExclusions && is_excluded(&name_str) {
                continue;
            }

            let file_type = entry.file_type().await?;
            let from_path = entry.path();
            if file_type.is_symlink() {
                tracing::warn!(path = %from_path.display(), "skipping symlinked entry during copy");
                continue;
            }

            let to_path = to.join(&name);
            if file_type.is_dir() {
                // Skip the whole subtree that overlaps the destination: a dir
                // inside `dst` would copy the output into itself, and an
                // ancestor of `dst` leads only back to it — descending would
                // leave empty husks of the destination's own parent chain.
                let from_abs = lexical_absolute(&from_path)?;
                if from_abs.starts_with(&dst_abs) || dst_abs.starts_with(&from_abs) {
                    tracing::warn!(
                        path = %from_path.display(),
                        "source directory overlaps the destination, skipping"
                    );
                    continue;
                }
                stack.push((from_path, to_path));
            } else {
                tokio::fs::copy(&from_path, &to_path).await?;
            }
        }
    }
    Ok(())
}

/// Content identity of a skill directory: sha256 over sorted relative paths
/// and file bytes, seen through the canonical exclusion filter so a source
/// tree and its materialized entry hash identically.
pub fn tree_hash(dir: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy().into_owned();
            if is_excluded(&name_str) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else {
                let rel = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                files.push((rel, path));
            }
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (rel, path) in files {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&path)?);
        hasher.update([0u8]);
    }
    Ok(hex(&hasher.finalize()))
}

/// Content identity of the manifest alone: sha256 of `SKILL.md`.
pub fn manifest_hash(dir: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    let bytes = std::fs::read(dir.join(MANIFEST_FILE))?;
    Ok(hex(&Sha256::digest(bytes)))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: test\n---\nbody\n"),
        )
        .unwrap();
    }

    fn identity(ns: Option<&str>, name: &str) -> SkillIdentity {
        SkillIdentity::new(ns, name)
    }

    #[test]
    fn test_entry_path_with_and_without_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CanonicalStore::new(tmp.path());

        let bare = store.entry_path(&identity(None, "alpha")).unwrap();
        assert_eq!(bare, store.root().join("alpha"));

        let spaced = store.entry_path(&identity(Some("ns1"), "bird")).unwrap();
        assert_eq!(spaced, store.root().join("ns1/bird"));
    }

    #[test]
    fn test_entry_path_rejects_unsanitized_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CanonicalStore::new(tmp.path());
        // Identities built through `new` are sanitized; a hand-built one with
        // raw separators must still be caught by containment.
        let evil = SkillIdentity {
            namespace: Some("../..".into()),
            name: "x".into(),
        };
        assert!(store.entry_path(&evil).is_err());
        let evil = SkillIdentity {
            namespace: None,
            name: "../escape".into(),
        };
        assert!(store.entry_path(&evil).is_err());
    }

    #[tokio::test]
    async fn test_materialize_copies_and_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_skill(&src, "alpha");
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::write(src.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(src.join("README.md"), "readme").unwrap();
        std::fs::write(src.join("metadata.json"), "{}").unwrap();
        std::fs::write(src.join("_hidden.md"), "internal").unwrap();
        std::fs::create_dir_all(src.join("assets")).unwrap();
        std::fs::write(src.join("assets/data.csv"), "1,2,3").unwrap();

        let store = CanonicalStore::new(tmp.path());
        let entry = store
            .materialize(&identity(None, "alpha"), &src, false)
            .await
            .unwrap();

        assert!(entry.path.join("SKILL.md").is_file());
        assert!(entry.path.join("assets/data.csv").is_file());
        assert!(!entry.path.join(".git").exists());
        assert!(!entry.path.join("README.md").exists());
        assert!(!entry.path.join("metadata.json").exists());
        assert!(!entry.path.join("_hidden.md").exists());
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent_and_conflicts_on_change() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_skill(&src, "alpha");

        let store = CanonicalStore::new(tmp.path());
        let id = identity(None, "alpha");
        let first = store.materialize(&id, &src, false).await.unwrap();
        // Same content again: fine without overwrite.
        let second = store.materialize(&id, &src, false).await.unwrap();
        assert_eq!(first.path, second.path);

        // Changed content: conflict without overwrite, replaced with it.
        std::fs::write(src.join("SKILL.md"), "---\nname: alpha\ndescription: v2\n---\n").unwrap();
        let err = store.materialize(&id, &src, false).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        store.materialize(&id, &src, true).await.unwrap();
        assert_eq!(tree_hash(&first.path).unwrap(), tree_hash(&src).unwrap());
    }

    #[tokio::test]
    async fn test_namespaced_same_names_coexist() {
        let tmp = tempfile::tempdir().unwrap();
        let src1 = tmp.path().join("src1");
        let src2 = tmp.path().join("src2");
        write_skill(&src1, "bird");
        std::fs::write(src1.join("SKILL.md"), "---\nname: bird\ndescription: one\n---\n").unwrap();
        write_skill(&src2, "bird");
        std::fs::write(src2.join("SKILL.md"), "---\nname: bird\ndescription: two\n---\n").unwrap();

        let store = CanonicalStore::new(tmp.path());
        let a = store
            .materialize(&identity(Some("ns1"), "bird"), &src1, false)
            .await
            .unwrap();
        let b = store
            .materialize(&identity(Some("ns2"), "bird"), &src2, false)
            .await
            .unwrap();

        assert_eq!(a.path, store.root().join("ns1/bird"));
        assert_eq!(b.path, store.root().join("ns2/bird"));
        assert_ne!(tree_hash(&a.path).unwrap(), tree_hash(&b.path).unwrap());
    }

    #[tokio::test]
    async fn test_release_respects_references_and_cleans_namespace_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_skill(&src, "bird");

        let store = CanonicalStore::new(tmp.path());
        let id = identity(Some("ns1"), "bird");
        store.materialize(&id, &src, false).await.unwrap();

        let kept = store
            .release_if_unreferenced(&id, &["cursor".to_string()])
            .await
            .unwrap();
        assert!(!kept);
        assert!(store.root().join("ns1/bird").is_dir());

        let removed = store.release_if_unreferenced(&id, &[]).await.unwrap();
        assert!(removed);
        assert!(!store.root().join("ns1/bird").exists());
        assert!(!store.root().join("ns1").exists());

        // Idempotent: releasing again reports nothing removed.
        assert!(!store.release_if_unreferenced(&id, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_skips_source_dirs_inside_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("project");
        write_skill(&src, "alpha");
        let docs = src.join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("guide.md"), "guide").unwrap();
        // Pre-existing store content next to the destination.
        let sibling = src.join(".agents/skills/other");
        std::fs::create_dir_all(&sibling).unwrap();
        std::fs::write(sibling.join("SKILL.md"), "other").unwrap();

        // Destination nested inside the source: the copier must not recurse
        // into its own output, and must not leave empty husks of the
        // destination's own parent chain (`.agents/skills/`) inside the entry.
        let dst = src.join(".agents/skills/alpha");
        copy_dir(&src, &dst, CopyFilter::CanonicalExclusions)
            .await
            .unwrap();
        assert!(dst.join("SKILL.md").is_file());
        assert!(dst.join("docs/guide.md").is_file());
        assert!(!dst.join(".agents").exists());
    }

    #[test]
    fn test_tree_hash_ignores_excluded_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("skill");
        write_skill(&dir, "alpha");
        let before = tree_hash(&dir).unwrap();
        std::fs::write(dir.join("README.md"), "docs").unwrap();
        std::fs::write(dir.join("_notes.txt"), "scratch").unwrap();
        assert_eq!(before, tree_hash(&dir).unwrap());

        std::fs::write(dir.join("extra.md"), "counts").unwrap();
        assert_ne!(before, tree_hash(&dir).unwrap());
    }

    #[test]
    fn test_manifest_hash_tracks_manifest_only() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("skill");
        write_skill(&dir, "alpha");
        let before = manifest_hash(&dir).unwrap();
        std::fs::write(dir.join("other.txt"), "x").unwrap();
        assert_eq!(before, manifest_hash(&dir).unwrap());
        std::fs::write(dir.join("SKILL.md"), "---\nname: alpha\ndescription: v2\n---\n").unwrap();
        assert_ne!(before, manifest_hash(&dir).unwrap());
    }
}
