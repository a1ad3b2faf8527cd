//! Path canonicalization with ancestor fallback.
//!
//! The filesystem guard, tripwires, and self-defense all canonicalize
//! candidate paths before matching. Two requirements drive the shape of
//! this module: a path that does not exist yet must still canonicalize
//! (writes to new files are checked), and a symlink inside the workspace
//! must not escape an allowed prefix.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to `$HOME`.
#[must_use]
pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Canonicalize a path, falling back to the deepest existing ancestor.
///
/// `~` is expanded, relative paths are resolved against the current
/// directory, then symlinks are resolved. When the target does not exist,
/// the walk ascends to the deepest ancestor that does, takes its real path,
/// and reattaches the missing suffix (lexically normalized, so a dangling
/// `..` cannot re-escape the resolved ancestor).
#[must_use]
pub fn canonicalize_with_ancestors(path: &str) -> PathBuf {
    let expanded = expand_user(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };
    let absolute = normalize_lexically(&absolute);

    if let Ok(real) = absolute.canonicalize() {
        return real;
    }

    // Walk up to the deepest existing ancestor.
    let mut ancestor = absolute.as_path();
    while let Some(parent) = ancestor.parent() {
        ancestor = parent;
        if let Ok(real) = ancestor.canonicalize() {
            let suffix = absolute
                .strip_prefix(ancestor)
                .unwrap_or_else(|_| Path::new(""));
            return real.join(suffix);
        }
    }
    absolute
}

/// Remove `.` components and resolve `..` lexically.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    out
}

/// Whether `target` is inside `base` (or equal to it).
///
/// Containment is component-wise, so the lookalike prefix
/// `/workspace-evil` is not inside `/workspace`.
#[must_use]
pub fn path_within(base: &Path, target: &Path) -> bool {
    target.starts_with(base)
}
