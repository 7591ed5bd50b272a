use std::fmt;
use std::path::Path;

use crate::delivery_record::SendStatus;
use crate::error::Error;
use crate::recipient::Recipient;
use crate::storage::{write_atomic, StatusTable};

const HEADERS: [&str; 4] = ["Full Name", "Recipient Email", "Send Status", "Error Message"];

#[derive(Debug, Clone, PartialEq)]
pub struct FailureRow {
    pub full_name: String,
    pub email_addr: String,
    pub send_status: SendStatus,
    pub error_message: String,
}

/// Every recipient that ended a run in failure, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureReport {
    rows: Vec<FailureRow>,
}

impl FailureReport {
    pub fn new() -> FailureReport {
        FailureReport::default()
    }

    pub fn push(&mut self, row: FailureRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[FailureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&HEADERS)?;
        for row in &self.rows {
            let status = row.send_status.to_string();
            writer.write_record(&[
                row.full_name.as_str(),
                row.email_addr.as_str(),
                status.as_str(),
                row.error_message.as_str(),
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        write_atomic(path, &bytes)?;
        Ok(())
    }
}

fn cells(row: &FailureRow) -> [String; 4] {
    let flat = |s: &str| s.replace("\r\n", " ").replace('\n', " ");
    [
        flat(&row.full_name),
        flat(&row.email_addr),
        row.send_status.to_string(),
        flat(&row.error_message),
    ]
}

// +-----+-----+ style grid, `=` under the header
impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body: Vec<[String; 4]> = self.rows.iter().map(cells).collect();

        let mut widths = [0usize; 4];
        for (i, h) in HEADERS.iter().enumerate() {
            widths[i] = h.chars().count();
        }
        for row in &body {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        rule(f, &widths, '-')?;
        line(f, &widths, &HEADERS)?;
        rule(f, &widths, '=')?;
        for row in &body {
            let refs: Vec<&str> = row.iter().map(String::as_str).collect();
            line(f, &widths, &refs)?;
            rule(f, &widths, '-')?;
        }
        Ok(())
    }
}

fn rule(f: &mut fmt::Formatter, widths: &[usize; 4], fill: char) -> fmt::Result {
    write!(f, "+")?;
    for w in widths.iter() {
        write!(f, "{}+", fill.to_string().repeat(w + 2))?;
    }
    writeln!(f)
}

fn line(f: &mut fmt::Formatter, widths: &[usize; 4], cells: &[&str]) -> fmt::Result {
    write!(f, "|")?;
    for (cell, w) in cells.iter().zip(widths.iter()) {
        let pad = w - cell.chars().count();
        write!(f, " {}{} |", cell, " ".repeat(pad))?;
    }
    writeln!(f)
}

/// What happened to each recipient during one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Subset of `failed`
    pub quota_rejected: usize,
    pub skipped_blacklisted: usize,
    pub skipped_already_sent: usize,
    pub skipped_unknown_status: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "processed {}: sent {}, failed {} ({} over quota), skipped {} blacklisted, {} already sent, {} unknown status",
            self.processed,
            self.sent,
            self.failed,
            self.quota_rejected,
            self.skipped_blacklisted,
            self.skipped_already_sent,
            self.skipped_unknown_status
        )
    }
}

/// Progress of a recipient list against the status table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
}

impl StatusStats {
    pub fn compute(recipients: &[Recipient], table: &StatusTable) -> StatusStats {
        let mut stats = StatusStats {
            total: recipients.len(),
            ..StatusStats::default()
        };
        for recipient in recipients {
            match table.get(&recipient.email_addr).map(|r| &r.send_status) {
                Some(SendStatus::Success) => stats.sent += 1,
                Some(SendStatus::Failure) => stats.failed += 1,
                _ => {}
            }
        }
        stats.pending = stats.total - stats.sent;
        stats
    }
}

impl fmt::Display for StatusStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Total emails: {}", self.total)?;
        writeln!(f, "Sent emails: {}", self.sent)?;
        writeln!(f, "Failed emails: {}", self.failed)?;
        write!(f, "Pending emails: {}", self.pending)
    }
}
