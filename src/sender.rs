use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::delivery_record::{
    format_duration, DeliveryRecord, DeliveryStatusCode, SendStatus, TIMESTAMP_FORMAT,
};
use crate::error::TransportError;
use crate::event_log::EventLog;
use crate::message::Template;
use crate::recipient::Recipient;
use crate::storage::{DomainCounter, QuotaTable};
use crate::transport::Transport;

/// Performs one delivery attempt for one recipient and describes the outcome
/// as a `DeliveryRecord`. Never fails: every problem becomes a failure record.
pub struct Sender<T: Transport> {
    transport: T,
    from: String,
    helo_name: String,
    retry: RetryPolicy,
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> Sender<T> {
    pub fn new(
        transport: T,
        from: String,
        helo_name: String,
        retry: RetryPolicy,
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Sender<T> {
        Sender {
            transport,
            from,
            helo_name,
            retry,
            log,
            clock,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Admit `recipient` against today's quota, then hand the rendered message
    /// to the transport.
    pub fn send(
        &mut self,
        recipient: &Recipient,
        template: &Template,
        quota: &QuotaTable,
        limit: u32,
    ) -> DeliveryRecord {
        let started = self.clock.now();
        let domain = recipient.domain();

        if DomainCounter::is_quota_exceeded(domain, started.date_naive(), quota, limit) {
            let message = format!(
                "Domain Email Limit Exceeded for {}. Limit: {}/day.",
                domain, limit
            );
            self.log.error("sender", &message);
            return self.failure(
                recipient,
                started,
                DeliveryStatusCode::DomainQuotaExceeded,
                0,
                message,
            );
        }

        let email = match template.prepare(recipient, &self.from, started, &self.helo_name) {
            Ok(email) => email,
            Err(e) => {
                let message = format!("Error sending email to {}: {}", recipient.email_addr, e);
                self.log.error("sender", &message);
                return self.failure(
                    recipient,
                    started,
                    DeliveryStatusCode::UnknownError,
                    0,
                    message,
                );
            }
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match self.transport.deliver(&email) {
                Ok(()) => {
                    self.log
                        .info("sender", &format!("Email sent to {}", recipient.email_addr));
                    return DeliveryRecord {
                        full_name: recipient.full_name.clone(),
                        timestamp: self.clock.now().format(TIMESTAMP_FORMAT).to_string(),
                        send_status: SendStatus::Success,
                        delivery_status_code: DeliveryStatusCode::Delivered,
                        retry_count: attempt - 1,
                        error_message: String::new(),
                        delivery_duration: self.elapsed(started),
                    };
                }
                Err(e) => {
                    let message = describe(&e, recipient);
                    self.log.error("sender", &message);

                    if e.is_retryable() && attempt < max_attempts {
                        let delay = self.retry.retry_delay(attempt);
                        self.log.warn(
                            "sender",
                            &format!(
                                "retrying {} in {} seconds (attempt {} of {})",
                                recipient.email_addr,
                                delay.as_secs(),
                                attempt + 1,
                                max_attempts
                            ),
                        );
                        self.clock.sleep(delay);
                        attempt += 1;
                        continue;
                    }

                    let record = DeliveryRecord {
                        full_name: recipient.full_name.clone(),
                        timestamp: self.clock.now().format(TIMESTAMP_FORMAT).to_string(),
                        send_status: SendStatus::Failure,
                        delivery_status_code: e.status_code(),
                        retry_count: attempt - 1,
                        error_message: message,
                        delivery_duration: self.elapsed(started),
                    };
                    self.pause_after(&e);
                    return record;
                }
            }
        }
    }

    fn failure(
        &self,
        recipient: &Recipient,
        at: DateTime<Local>,
        code: DeliveryStatusCode,
        retry_count: u32,
        message: String,
    ) -> DeliveryRecord {
        DeliveryRecord {
            full_name: recipient.full_name.clone(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            send_status: SendStatus::Failure,
            delivery_status_code: code,
            retry_count,
            error_message: message,
            delivery_duration: format_duration(0),
        }
    }

    fn elapsed(&self, started: DateTime<Local>) -> String {
        format_duration((self.clock.now() - started).num_seconds())
    }

    // Slows down the rest of the run after a failure; no re-attempt follows.
    fn pause_after(&self, e: &TransportError) {
        let secs = match *e {
            TransportError::Authentication(_) => self.retry.auth_failure_pause_secs,
            TransportError::Protocol(_) | TransportError::Rejected(_) => {
                self.retry.protocol_failure_pause_secs
            }
            TransportError::Other(_) => self.retry.unknown_failure_pause_secs,
        };
        if secs > 0 {
            self.log.warn(
                "sender",
                &format!("waiting {} seconds before the next recipient", secs),
            );
            self.clock.sleep(std::time::Duration::from_secs(secs));
        }
    }
}

fn describe(e: &TransportError, recipient: &Recipient) -> String {
    match *e {
        TransportError::Authentication(ref s) => format!("SMTP authentication error: {}", s),
        TransportError::Protocol(ref s) | TransportError::Rejected(ref s) => {
            format!("SMTP error: {}", s)
        }
        TransportError::Other(ref s) => {
            format!("Error sending email to {}: {}", recipient.email_addr, s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event_log::{Level, MemoryLog};
    use crate::tests::ScriptedTransport;
    use chrono::TimeZone;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        log: Arc<MemoryLog>,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                clock: Arc::new(ManualClock::new(
                    Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
                )),
                log: Arc::new(MemoryLog::new()),
            }
        }

        fn sender(&self, transport: ScriptedTransport, retry: RetryPolicy) -> Sender<ScriptedTransport> {
            Sender::new(
                transport,
                "me@example.com".to_owned(),
                "example.com".to_owned(),
                retry,
                self.log.clone(),
                self.clock.clone(),
            )
        }
    }

    fn template() -> Template {
        Template::new("Hi", "Dear [Placeholder]", "[Placeholder]")
    }

    #[test]
    fn success_record() {
        let f = Fixture::new();
        let mut sender = f.sender(ScriptedTransport::new(), RetryPolicy::immediate());
        let alice = Recipient::new("Alice A", "a@x.com");

        let record = sender.send(&alice, &template(), &QuotaTable::new(), 10);

        assert_eq!(record.send_status, SendStatus::Success);
        assert_eq!(record.delivery_status_code, DeliveryStatusCode::Delivered);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.error_message, "");
        assert_eq!(record.full_name, "Alice A");
        assert_eq!(record.timestamp, "2024-05-01 09:00:00");
        assert_eq!(sender.transport().delivered(), vec!["a@x.com".to_owned()]);
    }

    #[test]
    fn quota_rejection_skips_transport() {
        let f = Fixture::new();
        let mut sender = f.sender(ScriptedTransport::new(), RetryPolicy::default());
        let mut quota = QuotaTable::new();
        let today = f.clock.today();
        quota.track("x.com", today);
        quota.track("x.com", today);

        let record = sender.send(&Recipient::new("Bob B", "b@x.com"), &template(), &quota, 1);

        assert_eq!(record.send_status, SendStatus::Failure);
        assert_eq!(record.delivery_status_code, DeliveryStatusCode::DomainQuotaExceeded);
        assert_eq!(record.delivery_duration, "0 seconds");
        assert!(record.error_message.contains("x.com"));
        assert!(record.error_message.contains("Limit: 1/day"));
        assert_eq!(sender.transport().attempts(), 0);
        assert!(f.clock.sleeps().is_empty());
    }

    #[test]
    fn auth_failure_is_not_retried_but_pauses() {
        let f = Fixture::new();
        let transport = ScriptedTransport::new().fail(
            "c@y.com",
            vec![TransportError::Authentication("535 bad credentials".to_owned())],
        );
        let retry = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let mut sender = f.sender(transport, retry);

        let record = sender.send(&Recipient::new("Carol C", "c@y.com"), &template(), &QuotaTable::new(), 10);

        assert_eq!(record.delivery_status_code, DeliveryStatusCode::AuthenticationError);
        assert_eq!(record.retry_count, 0);
        assert!(record.error_message.starts_with("SMTP authentication error:"));
        assert_eq!(sender.transport().attempts(), 1);
        assert_eq!(f.clock.sleeps(), vec![Duration::from_secs(60)]);
        assert!(f.log.contains(Level::Error, "535 bad credentials"));
    }

    #[test]
    fn protocol_failures_retry_with_growing_delay() {
        let f = Fixture::new();
        let transport = ScriptedTransport::new().fail(
            "d@z.com",
            vec![
                TransportError::Protocol("451 later".to_owned()),
                TransportError::Protocol("451 later".to_owned()),
            ],
        );
        let retry = RetryPolicy {
            max_attempts: 3,
            base_retry_delay_secs: 10,
            ..RetryPolicy::default()
        };
        let mut sender = f.sender(transport, retry);

        let record = sender.send(&Recipient::new("Dan", "d@z.com"), &template(), &QuotaTable::new(), 10);

        assert_eq!(record.send_status, SendStatus::Success);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.delivery_duration, "40 seconds");
        assert_eq!(
            f.clock.sleeps(),
            vec![Duration::from_secs(10), Duration::from_secs(30)]
        );
    }

    #[test]
    fn exhausted_retries_record_the_last_error() {
        let f = Fixture::new();
        let transport = ScriptedTransport::new().fail(
            "e@z.com",
            vec![
                TransportError::Other("connection refused".to_owned()),
                TransportError::Rejected("554 rejected".to_owned()),
            ],
        );
        let retry = RetryPolicy {
            max_attempts: 2,
            base_retry_delay_secs: 5,
            protocol_failure_pause_secs: 120,
            ..RetryPolicy::default()
        };
        let mut sender = f.sender(transport, retry);

        let record = sender.send(&Recipient::new("Eve", "e@z.com"), &template(), &QuotaTable::new(), 10);

        assert_eq!(record.send_status, SendStatus::Failure);
        assert_eq!(record.delivery_status_code, DeliveryStatusCode::ProtocolError);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.error_message, "SMTP error: 554 rejected");
        assert_eq!(
            f.clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(120)]
        );
    }

    #[test]
    fn permanent_rejection_is_not_retried() {
        let f = Fixture::new();
        let transport = ScriptedTransport::new().fail(
            "g@z.com",
            vec![
                TransportError::Rejected("550 mailbox unavailable".to_owned()),
                TransportError::Rejected("550 mailbox unavailable".to_owned()),
            ],
        );
        let retry = RetryPolicy {
            max_attempts: 3,
            base_retry_delay_secs: 5,
            protocol_failure_pause_secs: 120,
            ..RetryPolicy::default()
        };
        let mut sender = f.sender(transport, retry);

        let record = sender.send(&Recipient::new("Gil", "g@z.com"), &template(), &QuotaTable::new(), 10);

        assert_eq!(record.send_status, SendStatus::Failure);
        assert_eq!(record.delivery_status_code, DeliveryStatusCode::ProtocolError);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.error_message, "SMTP error: 550 mailbox unavailable");
        assert_eq!(sender.transport().attempts(), 1);
        assert_eq!(f.clock.sleeps(), vec![Duration::from_secs(120)]);
    }
}
