use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::event_log::EventLog;

/// Domains that are never sent to. Backed by a newline-delimited file that
/// only ever grows.
///
/// Read and write problems are logged and otherwise ignored: an unreadable
/// file behaves as an empty blacklist, and a failed append still leaves the
/// domain blacklisted for the rest of the run.
pub struct Blacklist {
    path: PathBuf,
    domains: HashSet<String>,
    log: Arc<dyn EventLog>,
}

impl Blacklist {
    pub fn new<P: Into<PathBuf>>(path: P, log: Arc<dyn EventLog>) -> Blacklist {
        Blacklist {
            path: path.into(),
            domains: HashSet::new(),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// (Re)read the file and return the set.
    pub fn load(&mut self) -> &HashSet<String> {
        self.domains = match fs::read_to_string(&self.path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                self.log.error(
                    "blacklist",
                    &format!("error reading {}: {}", self.path.display(), e),
                );
                HashSet::new()
            }
        };
        &self.domains
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    pub fn domains(&self) -> &HashSet<String> {
        &self.domains
    }

    /// Add `domain`, appending it to the file unless it is already listed.
    /// Returns true if the domain was new.
    pub fn add(&mut self, domain: &str) -> bool {
        if !self.domains.insert(domain.to_owned()) {
            return false;
        }
        if let Err(e) = self.append(domain) {
            self.log.error(
                "blacklist",
                &format!("error appending {} to {}: {}", domain, self.path.display(), e),
            );
        } else {
            self.log.info("blacklist", &format!("added {}", domain));
        }
        true
    }

    fn append(&self, domain: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Don't glue onto a last line that has no newline
        let needs_newline = match fs::read(&self.path) {
            Ok(bytes) => !bytes.is_empty() && !bytes.ends_with(b"\n"),
            Err(_) => false,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if needs_newline {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", domain)?;
        file.sync_all()
    }
}
