mod smtp;

pub use self::smtp::SmtpRelay;

use crate::error::TransportError;
use crate::message::PreparedEmail;

/// Hands one prepared message to the outside world, synchronously.
pub trait Transport {
    fn deliver(&mut self, email: &PreparedEmail) -> Result<(), TransportError>;
}
