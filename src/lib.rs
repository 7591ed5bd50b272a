//! Resumable bulk email dispatch.
//!
//! A [`Dispatcher`] walks a recipient list once, in order, sending one
//! message per recipient through a [`Transport`]. Three small tables live on
//! disk next to the run:
//!
//! * the status table, one [`DeliveryRecord`] per address, so a second run
//!   never re-sends what already went out;
//! * the domain quota table, counting sends per domain per day against
//!   `domain_limit`;
//! * the blacklist, domains that went over their limit and are skipped from
//!   then on.
//!
//! Nothing that goes wrong with a single recipient stops the run. Every
//! problem ends up as a failure record and a row in the [`FailureReport`].

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate failure;

pub mod clock;
pub mod config;
pub mod delivery_record;
pub mod dispatch;
pub mod error;
pub mod event_log;
pub mod message;
pub mod recipient;
pub mod report;
pub mod sender;
pub mod storage;
pub mod transport;


pub use crate::clock::{Clock, SystemClock};
pub use crate::config::{Config, RelayConfig, RetryPolicy};
pub use crate::delivery_record::{DeliveryRecord, DeliveryStatusCode, SendStatus};
pub use crate::dispatch::{Dispatcher, RunOutcome, RunReport};
pub use crate::error::{Error, TransportError};
pub use crate::event_log::{EventLog, LogFacade};
pub use crate::message::{Attachment, PreparedEmail, Template};
pub use crate::recipient::{load_recipients, Recipient};
pub use crate::report::{FailureReport, RunSummary, StatusStats};
pub use crate::sender::Sender;
pub use crate::transport::{SmtpRelay, Transport};
