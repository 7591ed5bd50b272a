//! The three durable tables a run owns: delivery status, per-domain daily
//! counts, and the domain blacklist.
//!
//! Tables are read once when a run starts and rewritten in full after each
//! change. Rewrites go to a sibling temporary file which is synced and then
//! renamed over the original, so a crash leaves either the old or the new
//! table and never a truncated one.

pub mod blacklist;
pub mod domain_counter;
pub mod status_store;

pub use self::blacklist::Blacklist;
pub use self::domain_counter::{DomainCounter, DomainQuotaEntry, QuotaTable};
pub use self::status_store::{SchemaVersion, StatusStore, StatusTable};

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `bytes` via write-temp-then-rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// Rename an unreadable table to `<name>.unreadable-<stamp>` so a later
/// rewrite starts a fresh file instead of replacing it.
pub fn set_aside(path: &Path, stamp: &str) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_owned());
    let aside = path.with_file_name(format!("{}.unreadable-{}", name, stamp));
    fs::rename(path, &aside)?;
    Ok(aside)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_owned());
    path.with_file_name(format!(".{}.tmp", name))
}
