use std::fmt;
use std::str::FromStr;

/// Outcome of the last delivery attempt for a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failure,
    /// A value we did not write ourselves (hand-edited or corrupted table).
    /// Kept verbatim so a save does not destroy it.
    Other(String),
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendStatus::Success => write!(f, "success"),
            SendStatus::Failure => write!(f, "failure"),
            SendStatus::Other(ref s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for SendStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<SendStatus, ()> {
        Ok(match s {
            "success" => SendStatus::Success,
            "failure" => SendStatus::Failure,
            other => SendStatus::Other(other.to_owned()),
        })
    }
}

/// Why a record ended up the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatusCode {
    Delivered,
    DomainQuotaExceeded,
    AuthenticationError,
    ProtocolError,
    UnknownError,
    Other(String),
}

impl fmt::Display for DeliveryStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            DeliveryStatusCode::Delivered => "Delivered",
            DeliveryStatusCode::DomainQuotaExceeded => "DomainQuotaExceeded",
            DeliveryStatusCode::AuthenticationError => "AuthenticationError",
            DeliveryStatusCode::ProtocolError => "ProtocolError",
            DeliveryStatusCode::UnknownError => "UnknownError",
            DeliveryStatusCode::Other(ref s) => s,
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeliveryStatusCode {
    type Err = ();

    fn from_str(s: &str) -> Result<DeliveryStatusCode, ()> {
        Ok(match s {
            "Delivered" => DeliveryStatusCode::Delivered,
            // Older runs wrote the quota rejection under this name
            "DomainQuotaExceeded" | "DomainEmailLimitExceeded" => {
                DeliveryStatusCode::DomainQuotaExceeded
            }
            "AuthenticationError" => DeliveryStatusCode::AuthenticationError,
            "ProtocolError" => DeliveryStatusCode::ProtocolError,
            "UnknownError" => DeliveryStatusCode::UnknownError,
            other => DeliveryStatusCode::Other(other.to_owned()),
        })
    }
}

/// The current delivery state of one recipient. A new attempt overwrites the
/// previous record for the same address.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub full_name: String,

    /// Local wall time of the attempt, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,

    pub send_status: SendStatus,

    pub delivery_status_code: DeliveryStatusCode,

    /// Inline re-attempts made while producing this record
    pub retry_count: u32,

    /// Empty on success
    pub error_message: String,

    /// Time spent in the transport, e.g. `"3 seconds"`
    pub delivery_duration: String,
}

impl DeliveryRecord {
    pub fn succeeded(&self) -> bool {
        self.send_status == SendStatus::Success
    }

    pub fn failed(&self) -> bool {
        self.send_status == SendStatus::Failure
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_duration(secs: i64) -> String {
    format!("{} seconds", secs.max(0))
}
