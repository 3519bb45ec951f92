//! Writing issued material to disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use certmint_proto::IssuanceResult;

/// `<prefix>.key` and `<prefix>.crt`.
///
/// The suffix is appended, never substituted, so `out/alice.v2` becomes
/// `out/alice.v2.key`.
pub fn output_paths(prefix: &Path) -> (PathBuf, PathBuf) {
    let with_suffix = |suffix: &str| {
        let mut path: OsString = prefix.as_os_str().to_owned();
        path.push(suffix);
        PathBuf::from(path)
    };
    (with_suffix(".key"), with_suffix(".crt"))
}

/// Write the key and certificate next to `prefix`, creating parent
/// directories as needed. Returns the written paths.
pub async fn save(prefix: &Path, result: &IssuanceResult) -> Result<(PathBuf, PathBuf)> {
    let (key_path, cert_path) = output_paths(prefix);

    if let Some(parent) = key_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    tokio::fs::write(&key_path, result.key_pem())
        .await
        .with_context(|| format!("Failed to write {}", key_path.display()))?;
    tokio::fs::write(&cert_path, result.cert_pem())
        .await
        .with_context(|| format!("Failed to write {}", cert_path.display()))?;

    Ok((key_path, cert_path))
}
