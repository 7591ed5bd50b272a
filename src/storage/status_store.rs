use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::delivery_record::{DeliveryRecord, DeliveryStatusCode, SendStatus};
use crate::error::Error;
use crate::event_log::EventLog;
use crate::storage::write_atomic;

pub const STATUS_HEADER: [&str; 8] = [
    "emailId",
    "FullName",
    "timestamp",
    "send_status",
    "delivery_status_code",
    "retry_count",
    "error_message",
    "delivery_duration",
];

/// On-disk layouts of the status table we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// `emailId,status`
    V0 = 0,
    /// `STATUS_HEADER`
    V1 = 1,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V1;

    pub fn detect(headers: &csv::StringRecord) -> Option<SchemaVersion> {
        let has = |name: &str| headers.iter().any(|h| h == name);
        if STATUS_HEADER.iter().all(|h| has(h)) {
            Some(SchemaVersion::V1)
        } else if has("emailId") && has("status") {
            Some(SchemaVersion::V0)
        } else {
            None
        }
    }
}

/// Current record per recipient address, iterated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusTable {
    order: Vec<String>,
    records: HashMap<String, DeliveryRecord>,
}

impl StatusTable {
    pub fn new() -> StatusTable {
        StatusTable::default()
    }

    pub fn get(&self, email_addr: &str) -> Option<&DeliveryRecord> {
        self.records.get(email_addr)
    }

    /// Overwrite the record for `email_addr`. A recipient keeps its original
    /// position in the table.
    pub fn insert(&mut self, email_addr: String, record: DeliveryRecord) {
        if !self.records.contains_key(&email_addr) {
            self.order.push(email_addr.clone());
        }
        self.records.insert(email_addr, record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeliveryRecord)> {
        let records = &self.records;
        self.order
            .iter()
            .filter_map(move |k| records.get(k).map(|r| (k.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusRow {
    #[serde(rename = "emailId")]
    email_id: String,
    #[serde(rename = "FullName")]
    full_name: String,
    timestamp: String,
    send_status: String,
    delivery_status_code: String,
    retry_count: String,
    error_message: String,
    delivery_duration: String,
}

impl StatusRow {
    fn from_record(email_addr: &str, r: &DeliveryRecord) -> StatusRow {
        StatusRow {
            email_id: email_addr.to_owned(),
            full_name: r.full_name.clone(),
            timestamp: r.timestamp.clone(),
            send_status: r.send_status.to_string(),
            delivery_status_code: r.delivery_status_code.to_string(),
            retry_count: r.retry_count.to_string(),
            error_message: r.error_message.clone(),
            delivery_duration: r.delivery_duration.clone(),
        }
    }

    fn into_record(self) -> (String, DeliveryRecord) {
        let record = DeliveryRecord {
            full_name: self.full_name,
            timestamp: self.timestamp,
            send_status: self
                .send_status
                .parse()
                .unwrap_or_else(|_| SendStatus::Other(String::new())),
            delivery_status_code: self
                .delivery_status_code
                .parse()
                .unwrap_or_else(|_| DeliveryStatusCode::Other(String::new())),
            retry_count: self.retry_count.trim().parse().unwrap_or(0),
            error_message: self.error_message,
            delivery_duration: self.delivery_duration,
        };
        (self.email_id, record)
    }
}

#[derive(Debug, Deserialize)]
struct LegacyRow {
    #[serde(rename = "emailId")]
    email_id: String,
    status: String,
}

impl LegacyRow {
    fn into_record(self) -> (String, DeliveryRecord) {
        let send_status: SendStatus = self
            .status
            .parse()
            .unwrap_or_else(|_| SendStatus::Other(String::new()));
        let delivery_status_code = match send_status {
            SendStatus::Success => DeliveryStatusCode::Delivered,
            SendStatus::Failure => DeliveryStatusCode::UnknownError,
            SendStatus::Other(_) => DeliveryStatusCode::Other(String::new()),
        };
        let record = DeliveryRecord {
            full_name: String::new(),
            timestamp: String::new(),
            send_status,
            delivery_status_code,
            retry_count: 0,
            error_message: String::new(),
            delivery_duration: String::new(),
        };
        (self.email_id, record)
    }
}

/// The durable recipient → `DeliveryRecord` table.
pub struct StatusStore {
    path: PathBuf,
    log: Arc<dyn EventLog>,
}

impl StatusStore {
    pub fn new<P: Into<PathBuf>>(path: P, log: Arc<dyn EventLog>) -> StatusStore {
        StatusStore {
            path: path.into(),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. A missing file is created holding just the header.
    ///
    /// Rows that cannot be read are skipped with a warning; a header we do
    /// not recognize is an error.
    pub fn load(&self) -> Result<StatusTable, Error> {
        if !self.path.exists() {
            self.save(&StatusTable::new())?;
            self.log.info(
                "status",
                &format!("created empty status table at {}", self.path.display()),
            );
            return Ok(StatusTable::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let version = match SchemaVersion::detect(&headers) {
            Some(v) => v,
            None => return Err(Error::UnknownSchema(self.path.display().to_string())),
        };

        let mut table = StatusTable::new();
        match version {
            SchemaVersion::V1 => {
                for row in reader.deserialize::<StatusRow>() {
                    match row {
                        Ok(row) => {
                            let (email, record) = row.into_record();
                            table.insert(email, record);
                        }
                        Err(e) => {
                            if e.is_io_error() {
                                return Err(e.into());
                            }
                            self.skip_row(&e)
                        }
                    }
                }
            }
            SchemaVersion::V0 => {
                self.log.info(
                    "status",
                    &format!(
                        "{} uses the v0 layout, it will be rewritten as v{}",
                        self.path.display(),
                        SchemaVersion::CURRENT as u8
                    ),
                );
                for row in reader.deserialize::<LegacyRow>() {
                    match row {
                        Ok(row) => {
                            let (email, record) = row.into_record();
                            table.insert(email, record);
                        }
                        Err(e) => {
                            if e.is_io_error() {
                                return Err(e.into());
                            }
                            self.skip_row(&e)
                        }
                    }
                }
            }
        }

        Ok(table)
    }

    /// Rewrite the whole table.
    pub fn save(&self, table: &StatusTable) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(&STATUS_HEADER)?;
        for (email, record) in table.iter() {
            writer.serialize(StatusRow::from_record(email, record))?;
        }
        let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn skip_row(&self, e: &csv::Error) {
        self.log.warn(
            "status",
            &format!("skipping unreadable row in {}: {}", self.path.display(), e),
        );
    }
}
