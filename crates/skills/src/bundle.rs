//! Zip bundle extraction for `skill_exec`/`skill_ref_read` over non-filesystem
//! sources: enclosed-name traversal guard, containment check, `io::copy`
//! per entry, sha256 fingerprinting, an explicit top-level directory
//! allowlist, and atomic temp-dir-then-rename staging
//! so a crash mid-extraction can never be mistaken for a cache hit.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Result, SkillError};

/// Size and entry-count ceilings enforced during extraction.
#[derive(Debug, Clone)]
pub struct BundleLimits {
    pub max_bytes: u64,
    pub max_extracted_bytes: u64,
    pub max_single_file_bytes: u64,
    pub max_files: usize,
}

impl BundleLimits {
    pub fn from_input_size(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_extracted_bytes: max_bytes.saturating_mul(16),
            max_single_file_bytes: max_bytes,
            max_files: 4096,
        }
    }
}

const ALLOWED_TOP_LEVEL_DIRS: [&str; 2] = ["actions", "references"];

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn top_level_component(path: &Path) -> Option<String> {
    path.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned())
}

/// Rejects any entry name that isn't a plain relative path inside one of
/// the allowed top-level directories.
fn validate_entry_name(raw_name: &str, enclosed: &Path) -> Result<()> {
    if raw_name.contains('\\') {
        return Err(SkillError::UnsafeBundleEntry(raw_name.to_string()));
    }
    if Path::new(raw_name).is_absolute() {
        return Err(SkillError::UnsafeBundleEntry(raw_name.to_string()));
    }
    if raw_name.split('/').any(|seg| seg == "..") {
        return Err(SkillError::UnsafeBundleEntry(raw_name.to_string()));
    }
    match top_level_component(enclosed) {
        Some(top) if ALLOWED_TOP_LEVEL_DIRS.contains(&top.as_str()) => Ok(()),
        _ => Err(SkillError::UnsafeBundleEntry(raw_name.to_string())),
    }
}

/// Verifies `bytes` against `declared_sha256`, extracts into a fresh temp
/// directory under `cache_root`, then renames it to `<cache_root>/<sha256>/`
/// — the rename is the only step visible to a concurrent reader, so a
/// process that crashes mid-extraction never leaves a half-populated
/// directory at the final path.
pub fn extract_bundle(bytes: &[u8], declared_sha256: &str, cache_root: &Path, limits: &BundleLimits) -> Result<PathBuf> {
    if (bytes.len() as u64) > limits.max_bytes {
        return Err(SkillError::BundleTooLarge(format!(
            "bundle is {} bytes, exceeds max_bytes {}",
            bytes.len(),
            limits.max_bytes
        )));
    }
    let actual_sha256 = sha256_hex(bytes);
    if !actual_sha256.eq_ignore_ascii_case(declared_sha256) {
        return Err(SkillError::BundleFingerprintMismatch {
            expected: declared_sha256.to_string(),
            actual: actual_sha256,
        });
    }

    let final_dir = cache_root.join(&actual_sha256);
    if final_dir.is_dir() {
        return Ok(final_dir);
    }

    fs::create_dir_all(cache_root)?;
    let staging_dir = cache_root.join(format!(".staging-{actual_sha256}-{}", std::process::id()));
    if staging_dir.exists() {
        fs::remove_dir_all(&staging_dir)?;
    }
    fs::create_dir_all(&staging_dir)?;

    if let Err(e) = extract_into(bytes, &staging_dir, limits) {
        let _ = fs::remove_dir_all(&staging_dir);
        return Err(e);
    }

    fs::rename(&staging_dir, &final_dir)?;
    Ok(final_dir)
}

fn extract_into(bytes: &[u8], dest: &Path, limits: &BundleLimits) -> Result<()> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)?;

    if archive.len() > limits.max_files {
        return Err(SkillError::BundleTooLarge(format!("{} entries exceeds max_files {}", archive.len(), limits.max_files)));
    }

    let dest_canon = dest.canonicalize().unwrap_or_else(|_| dest.to_path_buf());
    let mut total_extracted: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();

        if entry.is_dir() {
            continue;
        }
        if entry.unix_mode().map(|m| m & 0o170000 == 0o120000).unwrap_or(false) {
            return Err(SkillError::UnsafeBundleEntry(raw_name));
        }
        let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(SkillError::UnsafeBundleEntry(raw_name));
        };
        validate_entry_name(&raw_name, &enclosed)?;

        if entry.size() > limits.max_single_file_bytes {
            return Err(SkillError::BundleTooLarge(format!(
                "entry '{raw_name}' is {} bytes, exceeds max_single_file_bytes {}",
                entry.size(),
                limits.max_single_file_bytes
            )));
        }
        total_extracted += entry.size();
        if total_extracted > limits.max_extracted_bytes {
            return Err(SkillError::BundleTooLarge(format!(
                "extracted size exceeds max_extracted_bytes {}",
                limits.max_extracted_bytes
            )));
        }

        let out_path = dest.join(&enclosed);
        let out_path_parent_check = out_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| dest.to_path_buf());
        if !out_path_parent_check.starts_with(dest) {
            return Err(SkillError::UnsafeBundleEntry(raw_name));
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let resolved_parent = out_path.parent().and_then(|p| p.canonicalize().ok()).unwrap_or_else(|| dest_canon.clone());
        if !resolved_parent.starts_with(&dest_canon) {
            return Err(SkillError::UnsafeBundleEntry(raw_name));
        }

        let mut out_file = fs::File::create(&out_path)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        std::io::copy(&mut buf.as_slice(), &mut out_file)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::FileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extracts_allowed_entries_and_verifies_fingerprint() {
        let zip_bytes = build_zip(&[("actions/run.sh", b"#!/bin/sh\necho hi\n")]);
        let sha = sha256_hex(&zip_bytes);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(1024 * 1024);
        let out = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap();
        assert!(out.join("actions/run.sh").is_file());
    }

    #[test]
    fn rejects_fingerprint_mismatch() {
        let zip_bytes = build_zip(&[("actions/run.sh", b"hi")]);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(1024);
        let err = extract_bundle(&zip_bytes, "0000", cache.path(), &limits).unwrap_err();
        assert!(matches!(err, SkillError::BundleFingerprintMismatch { .. }));
    }

    #[test]
    fn rejects_entries_outside_allowed_top_level_dirs() {
        let zip_bytes = build_zip(&[("etc/passwd", b"nope")]);
        let sha = sha256_hex(&zip_bytes);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(1024);
        let err = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap_err();
        assert!(matches!(err, SkillError::UnsafeBundleEntry(_)));
    }

    #[test]
    fn rejects_path_traversal_entries() {
        let zip_bytes = build_zip(&[("actions/../../../etc/passwd", b"nope")]);
        let sha = sha256_hex(&zip_bytes);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(1024);
        let err = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap_err();
        assert!(matches!(err, SkillError::UnsafeBundleEntry(_)));
    }

    #[test]
    fn second_extraction_is_a_cache_hit_and_skips_reextraction() {
        let zip_bytes = build_zip(&[("references/doc.md", b"hello")]);
        let sha = sha256_hex(&zip_bytes);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(1024 * 1024);
        let first = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap();
        let second = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_bundle_over_max_bytes() {
        let zip_bytes = build_zip(&[("actions/run.sh", b"hi")]);
        let sha = sha256_hex(&zip_bytes);
        let cache = tempfile::tempdir().unwrap();
        let limits = BundleLimits::from_input_size(2);
        let err = extract_bundle(&zip_bytes, &sha, cache.path(), &limits).unwrap_err();
        assert!(matches!(err, SkillError::BundleTooLarge(_)));
    }
}
