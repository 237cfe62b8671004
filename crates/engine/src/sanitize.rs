//! Untrusted-name sanitization and path-containment checks.
//!
//! Every path the engine writes to or deletes passes through
//! [`assert_contained`] immediately before the operation. This is the sole
//! defense against a skill's declared name carrying traversal sequences or
//! separators.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Returned when sanitization leaves nothing usable.
pub const FALLBACK_NAME: &str = "skill";

/// Maximum length of a single path segment.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Turn an arbitrary string into a safe path segment.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9._]` into a
/// single hyphen, strips leading/trailing dots and hyphens, truncates to 255
/// chars, and falls back to [`FALLBACK_NAME`] when nothing remains. Total:
/// no I/O, no error path, and the result is never empty, `.`, or `..`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_hyphen = false;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' {
            out.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }

    // Trim before truncating so a long name keeps as much real content as
    // possible, then trim again in case truncation exposed a new edge.
    let trimmed = out.trim_matches(['.', '-']);
    let truncated: String = trimmed.chars().take(MAX_SEGMENT_LEN).collect();
    let result = truncated.trim_matches(['.', '-']);

    if result.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        result.to_string()
    }
}

/// Require `candidate` to be `base` itself or a strict descendant of it.
///
/// Both paths are lexically normalized to absolute form first; the descent
/// check is component-wise (`Path::starts_with`), so `/base-evil` never
/// matches `/base`. Returns the normalized candidate on success.
pub fn assert_contained(base: &Path, candidate: &Path) -> Result<PathBuf> {
    let base = lexical_absolute(base)?;
    let candidate = lexical_absolute(candidate)?;
    if candidate.starts_with(&base) {
        Ok(candidate)
    } else {
        Err(Error::PathTraversal {
            base,
            path: candidate,
        })
    }
}

/// Join a single segment onto `base` and verify the result stays inside it.
pub fn checked_join(base: &Path, segment: &str) -> Result<PathBuf> {
    let joined = base.join(segment);
    let normalized = assert_contained(base, &joined)?;
    // Joining exactly one segment must descend exactly one level; an empty or
    // absolute segment would alias the base or jump elsewhere.
    if normalized == lexical_absolute(base)? {
        return Err(Error::PathTraversal {
            base: base.to_path_buf(),
            path: joined,
        });
    }
    Ok(normalized)
}

/// Normalize a path lexically: absolute, no `.`/`..` components. Unlike
/// `canonicalize`, this never touches the filesystem, so it works for paths
/// that don't exist yet. `..` at the root stays at the root, which makes an
/// escape visible to the containment check instead of erroring here.
pub fn lexical_absolute(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(std::path::MAIN_SEPARATOR_STR),
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            Component::Normal(c) => out.push(c),
        }
    }
    Ok(out)
}
