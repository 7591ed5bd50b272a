use std::collections::HashSet;
use std::path::Path;

use crate::error::Error;
use crate::event_log::EventLog;

/// One row of the recipient list. The address is the identity key and is
/// compared exactly as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub full_name: String,
    pub email_addr: String,
}

impl Recipient {
    pub fn new<N: Into<String>, E: Into<String>>(full_name: N, email_addr: E) -> Recipient {
        Recipient {
            full_name: full_name.into(),
            email_addr: email_addr.into(),
        }
    }

    /// Everything after the last `@`, as written. An address without `@` is
    /// its own domain.
    pub fn domain(&self) -> &str {
        domain_of(&self.email_addr)
    }

    /// First whitespace-separated token of the full name.
    pub fn first_name(&self) -> &str {
        self.full_name.split_whitespace().next().unwrap_or("")
    }
}

pub fn domain_of(email_addr: &str) -> &str {
    match email_addr.rfind('@') {
        Some(at) => &email_addr[at + 1..],
        None => email_addr,
    }
}

#[derive(Debug, Deserialize)]
struct RecipientRow {
    #[serde(rename = "fullName")]
    full_name: String,
    #[serde(rename = "emailId")]
    email_id: String,
}

/// Read the recipient list (`fullName,emailId`) in file order.
///
/// Rows without an address are dropped with a warning. Repeated addresses
/// are kept but reported, since only the first of them can ever be sent.
pub fn load_recipients<P: AsRef<Path>>(path: P, log: &dyn EventLog) -> Result<Vec<Recipient>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut recipients: Vec<Recipient> = Vec::new();

    for (index, row) in reader.deserialize::<RecipientRow>().enumerate() {
        let line = index + 2; // header is line 1
        let row = row?;
        if row.email_id.is_empty() {
            log.warn("recipients", &format!("line {}: no emailId, skipping", line));
            continue;
        }
        if !seen.insert(row.email_id.clone()) {
            log.warn(
                "recipients",
                &format!("line {}: {} is listed more than once", line, row.email_id),
            );
        }
        recipients.push(Recipient::new(row.full_name, row.email_id));
    }

    log.info(
        "recipients",
        &format!("loaded {} recipients from {}", recipients.len(), path.as_ref().display()),
    );

    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::{Level, MemoryLog};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn domain_and_first_name() {
        let r = Recipient::new("Alice  Anders", "alice@Example.com");
        assert_eq!(r.domain(), "Example.com");
        assert_eq!(r.first_name(), "Alice");

        let odd = Recipient::new("", "user@relay@x.org");
        assert_eq!(odd.domain(), "x.org");
        assert_eq!(odd.first_name(), "");

        assert_eq!(domain_of("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn loads_in_order_and_flags_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipients.csv");
        fs::write(
            &path,
            "fullName,emailId\n\
             Alice A,a@x.com\n\
             Bob B , b@x.com \n\
             Nobody,\n\
             Alice Again,a@x.com\n",
        )
        .unwrap();

        let log = MemoryLog::new();
        let recipients = load_recipients(&path, &log).unwrap();

        assert_eq!(
            recipients,
            vec![
                Recipient::new("Alice A", "a@x.com"),
                Recipient::new("Bob B", "b@x.com"),
                Recipient::new("Alice Again", "a@x.com"),
            ]
        );
        assert!(log.contains(Level::Warn, "line 4: no emailId"));
        assert!(log.contains(Level::Warn, "a@x.com is listed more than once"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let log = MemoryLog::new();
        assert!(load_recipients(dir.path().join("nope.csv"), &log).is_err());
    }
}
