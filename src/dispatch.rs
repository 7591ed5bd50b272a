use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::delivery_record::{DeliveryStatusCode, SendStatus};
use crate::error::Error;
use crate::event_log::EventLog;
use crate::message::Template;
use crate::recipient::Recipient;
use crate::report::{FailureReport, FailureRow, RunSummary};
use crate::sender::Sender;
use crate::storage::{set_aside, Blacklist, DomainCounter, QuotaTable, StatusStore, StatusTable};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every recipient in the list was considered
    Completed,
    /// The cancel flag was raised between two recipients
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub failures: FailureReport,
}

// What the status table says about a recipient before we touch it
enum Prior {
    New,
    Retry,
    Succeeded,
    Unknown(String),
}

/// Walks a recipient list once, in order, and delivers to everyone who is
/// not blacklisted and has not already succeeded.
///
/// The status, quota and blacklist tables are loaded once per run. After
/// each recipient that reaches the sender, the quota table and then the
/// status table are rewritten, so a run that dies halfway can be started
/// again without sending anything twice.
pub struct Dispatcher<T: Transport> {
    domain_limit: u32,
    status_store: StatusStore,
    counter: DomainCounter,
    blacklist: Blacklist,
    sender: Sender<T>,
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    cancel: Arc<AtomicBool>,
    failure_report_path: Option<PathBuf>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        domain_limit: u32,
        status_store: StatusStore,
        counter: DomainCounter,
        blacklist: Blacklist,
        sender: Sender<T>,
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Dispatcher<T> {
        Dispatcher {
            domain_limit,
            status_store,
            counter,
            blacklist,
            sender,
            log,
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
            failure_report_path: None,
        }
    }

    /// Wire up every table and the sender from a resolved `Config`.
    pub fn from_config(
        config: &Config,
        transport: T,
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Dispatcher<T> {
        let sender = Sender::new(
            transport,
            config.sender_identity.clone(),
            config.relay.helo_name.clone(),
            config.retry.clone(),
            log.clone(),
            clock.clone(),
        );
        let mut dispatcher = Dispatcher::new(
            config.domain_limit,
            StatusStore::new(config.status_path.clone(), log.clone()),
            DomainCounter::new(config.quota_path.clone(), log.clone()),
            Blacklist::new(config.blacklist_path.clone(), log.clone()),
            sender,
            log,
            clock,
        );
        dispatcher.failure_report_path = config.failure_report_path.clone();
        dispatcher
    }

    pub fn with_failure_report<P: Into<PathBuf>>(mut self, path: P) -> Dispatcher<T> {
        self.failure_report_path = Some(path.into());
        self
    }

    /// Share a cancel flag created elsewhere.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Dispatcher<T> {
        self.cancel = flag;
        self
    }

    /// Setting the returned flag stops the run before the next recipient.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn sender(&self) -> &Sender<T> {
        &self.sender
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Process `recipients` in order. Table and transport problems are logged
    /// and recorded; they never end the run early.
    pub fn run(&mut self, recipients: &[Recipient], template: &Template) -> RunReport {
        self.log.info("dispatch", "Email sending process started.");

        let mut statuses = match self.status_store.load() {
            Ok(table) => table,
            Err(e) => {
                self.unreadable(self.status_store.path(), &e);
                StatusTable::new()
            }
        };
        let mut quota = match self.counter.load() {
            Ok(table) => table,
            Err(e) => {
                self.unreadable(self.counter.path(), &e);
                QuotaTable::new()
            }
        };
        self.blacklist.load();

        let mut summary = RunSummary::default();
        let mut failures = FailureReport::new();
        let mut outcome = RunOutcome::Completed;

        for recipient in recipients {
            if self.cancel.load(Ordering::SeqCst) {
                self.log.warn("dispatch", "cancelled, remaining recipients left for the next run");
                outcome = RunOutcome::Cancelled;
                break;
            }

            let addr = recipient.email_addr.as_str();
            let domain = recipient.domain();

            if self.blacklist.contains(domain) {
                self.log.warn(
                    "dispatch",
                    &format!("skipping {}: domain {} is blacklisted", addr, domain),
                );
                summary.skipped_blacklisted += 1;
                continue;
            }

            match prior(&statuses, addr) {
                Prior::Succeeded => {
                    self.log
                        .info("dispatch", &format!("skipping {}: already sent", addr));
                    summary.skipped_already_sent += 1;
                    continue;
                }
                Prior::Unknown(status) => {
                    self.log.warn(
                        "dispatch",
                        &format!("skipping {}: unknown status {:?}", addr, status),
                    );
                    summary.skipped_unknown_status += 1;
                    continue;
                }
                Prior::Retry => self.log.warn(
                    "dispatch",
                    &format!("{} has already failed to send, retrying", addr),
                ),
                Prior::New => {}
            }

            self.log.info("dispatch", &format!("processing {}", addr));

            let today = self.clock.today();
            quota.track(domain, today);
            if self.counter.maybe_blacklist(domain, &quota, self.domain_limit) {
                self.blacklist.add(domain);
            }
            if let Err(e) = self.counter.save(&quota) {
                self.log.error(
                    "dispatch",
                    &format!("cannot write {}: {}", self.counter.path().display(), e),
                );
            }

            let record = self.sender.send(recipient, template, &quota, self.domain_limit);

            summary.processed += 1;
            if record.succeeded() {
                summary.sent += 1;
            } else {
                summary.failed += 1;
                if record.delivery_status_code == DeliveryStatusCode::DomainQuotaExceeded {
                    summary.quota_rejected += 1;
                }
                failures.push(FailureRow {
                    full_name: recipient.full_name.clone(),
                    email_addr: recipient.email_addr.clone(),
                    send_status: record.send_status.clone(),
                    error_message: record.error_message.clone(),
                });
            }

            statuses.insert(recipient.email_addr.clone(), record);
            if let Err(e) = self.status_store.save(&statuses) {
                self.log.error(
                    "dispatch",
                    &format!("cannot write {}: {}", self.status_store.path().display(), e),
                );
            }

            self.log.info("dispatch", &format!("done with {}", addr));
        }

        if let Some(ref path) = self.failure_report_path {
            if let Err(e) = failures.write_csv(path) {
                self.log.error(
                    "dispatch",
                    &format!("cannot write failure report {}: {}", path.display(), e),
                );
            }
        }

        self.log.info("dispatch", &summary.to_string());
        self.log.info("dispatch", "Email sending process completed.");

        RunReport {
            outcome,
            summary,
            failures,
        }
    }

    // Start over from an empty table, keeping the old file where the next
    // rewrite cannot reach it.
    fn unreadable(&self, path: &Path, e: &Error) {
        self.log.error(
            "dispatch",
            &format!("cannot read {}: {}", path.display(), e),
        );
        if !path.is_file() {
            return;
        }
        let stamp = self.clock.now().format("%Y%m%d%H%M%S").to_string();
        match set_aside(path, &stamp) {
            Ok(aside) => self.log.warn(
                "dispatch",
                &format!(
                    "moved {} to {}, starting from an empty table",
                    path.display(),
                    aside.display()
                ),
            ),
            Err(e) => self.log.error(
                "dispatch",
                &format!("cannot move {} aside: {}", path.display(), e),
            ),
        }
    }
}

fn prior(statuses: &StatusTable, addr: &str) -> Prior {
    match statuses.get(addr).map(|r| &r.send_status) {
        None => Prior::New,
        Some(SendStatus::Success) => Prior::Succeeded,
        Some(SendStatus::Failure) => Prior::Retry,
        Some(SendStatus::Other(s)) => Prior::Unknown(s.clone()),
    }
}
