use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::Error;
use crate::event_log::EventLog;
use crate::storage::write_atomic;

pub const QUOTA_HEADER: [&str; 3] = ["domain", "date", "count"];

/// Sends counted against one domain on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainQuotaEntry {
    pub domain: String,
    pub date: NaiveDate,
    pub count: u32,
}

/// Per-domain daily counts, keyed by domain.
///
/// A count only means something for the date stored next to it; the first
/// tracked send on a new day starts the domain over at 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaTable(BTreeMap<String, DomainQuotaEntry>);

impl QuotaTable {
    pub fn new() -> QuotaTable {
        QuotaTable::default()
    }

    pub fn get(&self, domain: &str) -> Option<&DomainQuotaEntry> {
        self.0.get(domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainQuotaEntry> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Count one more send for `domain` on `today`.
    pub fn track(&mut self, domain: &str, today: NaiveDate) -> u32 {
        let entry = self
            .0
            .entry(domain.to_owned())
            .or_insert_with(|| DomainQuotaEntry {
                domain: domain.to_owned(),
                date: today,
                count: 0,
            });
        if entry.date != today {
            entry.date = today;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count
    }

    /// True once today's count for `domain` is strictly above `limit`, i.e.
    /// from the `limit + 1`-th tracked send of the day on.
    pub fn is_exceeded(&self, domain: &str, today: NaiveDate, limit: u32) -> bool {
        match self.0.get(domain) {
            Some(entry) => entry.date == today && entry.count > limit,
            None => false,
        }
    }

    /// True exactly when the count has just reached `limit + 1`. Later
    /// sends on the same day push the count past that value, so this fires
    /// once per domain per day.
    pub fn just_crossed(&self, domain: &str, limit: u32) -> bool {
        match self.0.get(domain) {
            Some(entry) => u64::from(entry.count) == u64::from(limit) + 1,
            None => false,
        }
    }

    fn insert(&mut self, entry: DomainQuotaEntry) {
        self.0.insert(entry.domain.clone(), entry);
    }
}

/// The durable domain → `DomainQuotaEntry` table.
pub struct DomainCounter {
    path: PathBuf,
    log: Arc<dyn EventLog>,
}

impl DomainCounter {
    pub fn new<P: Into<PathBuf>>(path: P, log: Arc<dyn EventLog>) -> DomainCounter {
        DomainCounter {
            path: path.into(),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table; a missing file is an empty table.
    pub fn load(&self) -> Result<QuotaTable, Error> {
        let mut table = QuotaTable::new();
        if !self.path.exists() {
            return Ok(table);
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        reader.headers()?;
        for row in reader.deserialize::<DomainQuotaEntry>() {
            match row {
                Ok(entry) => table.insert(entry),
                // the reader would hand back the same I/O error forever
                Err(e) => {
                    if e.is_io_error() {
                        return Err(e.into());
                    }
                    self.log.warn(
                        "quota",
                        &format!("skipping unreadable row in {}: {}", self.path.display(), e),
                    )
                }
            }
        }
        Ok(table)
    }

    /// Rewrite the whole table.
    pub fn save(&self, table: &QuotaTable) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(&QUOTA_HEADER)?;
        for entry in table.iter() {
            writer.serialize(entry)?;
        }
        let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    /// Admission check made before every send, see [`QuotaTable::is_exceeded`].
    pub fn is_quota_exceeded(
        domain: &str,
        today: NaiveDate,
        table: &QuotaTable,
        limit: u32,
    ) -> bool {
        table.is_exceeded(domain, today, limit)
    }

    /// Returns true when `domain` has just gone over `limit` and should be
    /// added to the blacklist. Calling it again after further sends returns
    /// false.
    pub fn maybe_blacklist(&self, domain: &str, table: &QuotaTable, limit: u32) -> bool {
        if table.just_crossed(domain, limit) {
            self.log.warn(
                "quota",
                &format!("{} went over its limit of {}/day, blacklisting", domain, limit),
            );
            true
        } else {
            false
        }
    }
}
