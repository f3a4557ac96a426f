//! Escape-safe path resolution for `ExecutionContext.workspace_root`.

use std::path::{Component, Path, PathBuf};

/// Resolve `requested` against `workspace_root`, rejecting absolute paths,
/// raw `..` components, and anything that canonicalizes outside the root.
pub fn resolve_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!("absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root =
        workspace_root.canonicalize().map_err(|e| format!("cannot resolve workspace root '{}': {e}", workspace_root.display()))?;

    let candidate = canonical_root.join(requested_path);

    let resolved = if candidate.exists() {
        candidate.canonicalize().map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail_parts: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(file_name) = existing.file_name() {
                        tail_parts.push(file_name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved =
            existing.canonicalize().map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail_parts.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!("path '{}' resolves outside workspace root '{}'", requested, canonical_root.display()));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let resolved = resolve_path(dir.path(), "a.txt").unwrap();
        assert!(resolved.ends_with("a.txt"));
    }

    #[test]
    fn rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_dir_component() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_path(dir.path(), "../escape.txt").is_err());
    }

    #[test]
    fn resolves_nonexistent_nested_path_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path(dir.path(), "new/nested/file.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }
}
