use crate::config::{AuthMechanism, Config, RelayConfig, RelaySecurity};
use crate::error::TransportError;
use crate::event_log::EventLog;
use crate::message::PreparedEmail;
use crate::transport::Transport;
use lettre::smtp::authentication::{Credentials, Mechanism};
use lettre::smtp::client::net::ClientTlsParameters;
use lettre::smtp::error::Error as LettreSmtpError;
use lettre::smtp::extension::ClientId;
use lettre::smtp::response::{Category, Severity};
use lettre::smtp::{ClientSecurity, SmtpClient};
use lettre::{EmailAddress, Envelope, SendableEmail};
use native_tls::{Protocol, TlsConnector};
use std::sync::Arc;
use std::time::Duration;

/// Delivers every message through one authenticated SMTP relay. A fresh
/// session is opened for each message.
pub struct SmtpRelay {
    relay: RelayConfig,
    username: String,
    password: String,
    log: Arc<dyn EventLog>,
}

impl SmtpRelay {
    pub fn new(relay: RelayConfig, username: String, password: String, log: Arc<dyn EventLog>) -> SmtpRelay {
        SmtpRelay {
            relay,
            username,
            password,
            log,
        }
    }

    pub fn from_config(config: &Config, log: Arc<dyn EventLog>) -> SmtpRelay {
        SmtpRelay::new(
            config.relay.clone(),
            config.sender_identity.clone(),
            config.sender_secret.clone(),
            log,
        )
    }

    fn client_security(&self) -> Result<ClientSecurity, TransportError> {
        if self.relay.security == RelaySecurity::None {
            return Ok(ClientSecurity::None);
        }

        let connector = TlsConnector::builder()
            .min_protocol_version(Some(Protocol::Tlsv12))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to create TLS connector: {}", e)))?;
        let tls_parameters = ClientTlsParameters::new(self.relay.domain_name.clone(), connector);

        Ok(match self.relay.security {
            RelaySecurity::Wrapper => ClientSecurity::Wrapper(tls_parameters),
            _ => ClientSecurity::Required(tls_parameters),
        })
    }
}

impl Transport for SmtpRelay {
    fn deliver(&mut self, email: &PreparedEmail) -> Result<(), TransportError> {
        let sendable_email = as_sendable_email(email)?;

        let client = SmtpClient::new(
            (self.relay.domain_name.as_str(), self.relay.port),
            self.client_security()?,
        )
        .map_err(|e| {
            self.log.error("smtp", &format!("failed to set up SMTP transport: {:?}", e));
            classify(e)
        })?;

        let mechanism = match self.relay.mechanism {
            AuthMechanism::Plain => Mechanism::Plain,
            AuthMechanism::Login => Mechanism::Login,
        };

        let mut mailer = client
            .hello_name(ClientId::Domain(self.relay.helo_name.clone()))
            .smtp_utf8(true) // is only used if the server supports it
            .timeout(Some(Duration::from_secs(self.relay.smtp_timeout_secs)))
            .authentication_mechanism(mechanism)
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .transport();

        let result = match lettre::Transport::send(&mut mailer, sendable_email) {
            Ok(response) => match response.code.severity {
                Severity::PositiveCompletion | Severity::PositiveIntermediate => {
                    self.log
                        .info("smtp", &format!("{} accepted: {:?}", email.to, response));
                    Ok(())
                }
                _ => Err(classify(LettreSmtpError::from(response))),
            },
            Err(e) => Err(classify(e)),
        };

        mailer.close();

        result
    }
}

fn as_sendable_email(email: &PreparedEmail) -> Result<SendableEmail, TransportError> {
    let invalid = |e: lettre::error::Error| TransportError::Other(format!("invalid email address: {:?}", e));
    let from = EmailAddress::new(email.from.clone()).map_err(invalid)?;
    let to = EmailAddress::new(email.to.clone()).map_err(invalid)?;
    let envelope = Envelope::new(Some(from), vec![to]).map_err(invalid)?;
    Ok(SendableEmail::new(
        envelope,
        email.message_id.clone(),
        email.message.clone(),
    ))
}

// 530/534/535/538 all sit in the x3x category
fn classify(e: LettreSmtpError) -> TransportError {
    match e {
        LettreSmtpError::Permanent(response) => match response.code.category {
            Category::Unspecified3 => TransportError::Authentication(format!("{:?}", response)),
            _ => TransportError::Rejected(format!("{:?}", response)),
        },
        LettreSmtpError::Transient(response) => match response.code.category {
            Category::Unspecified3 => TransportError::Authentication(format!("{:?}", response)),
            _ => TransportError::Protocol(format!("{:?}", response)),
        },
        LettreSmtpError::Client(s) => {
            if s.contains("authentication") {
                TransportError::Authentication(s.to_owned())
            } else {
                TransportError::Protocol(format!("internal client error: {}", s))
            }
        }
        LettreSmtpError::ResponseParsing(s) => {
            TransportError::Protocol(format!("response parsing error: {}", s))
        }
        LettreSmtpError::ChallengeParsing(de) => {
            TransportError::Protocol(format!("challenge parsing error: {:?}", de))
        }
        LettreSmtpError::Utf8Parsing(fue) => {
            TransportError::Protocol(format!("utf8 parsing error: {:?}", fue))
        }
        LettreSmtpError::Resolution => TransportError::Other("DNS resolution failed".to_owned()),
        LettreSmtpError::Io(ioe) => TransportError::Other(format!("I/O error: {}", ioe)),
        LettreSmtpError::Tls(tlse) => TransportError::Other(format!("TLS error: {}", tlse)),
        e => TransportError::Other(format!("{:?}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::smtp::response::{Code, Detail, Response};
    use std::io;

    fn reply(severity: Severity, category: Category, detail: Detail) -> Response {
        Response::new(
            Code::new(severity, category, detail),
            vec!["scripted reply".to_owned()],
        )
    }

    #[test]
    fn io_and_client_errors_are_classified() {
        let refused = LettreSmtpError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        match classify(refused) {
            TransportError::Other(msg) => assert!(msg.contains("refused")),
            other => panic!("unexpected {:?}", other),
        }

        let no_mech = LettreSmtpError::Client("No compatible authentication mechanism was found");
        match classify(no_mech) {
            TransportError::Authentication(_) => {}
            other => panic!("unexpected {:?}", other),
        }

        let internal = LettreSmtpError::Client("Connection closed");
        match classify(internal) {
            TransportError::Protocol(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn permanent_replies_are_not_retryable() {
        let unavailable = reply(Severity::PermanentNegativeCompletion, Category::MailSystem, Detail::Zero);
        let e = classify(LettreSmtpError::Permanent(unavailable));
        match e {
            TransportError::Rejected(ref msg) => assert!(msg.contains("scripted reply")),
            ref other => panic!("unexpected {:?}", other),
        }
        assert!(!e.is_retryable());

        let busy = reply(Severity::TransientNegativeCompletion, Category::MailSystem, Detail::One);
        let e = classify(LettreSmtpError::Transient(busy));
        match e {
            TransportError::Protocol(_) => {}
            ref other => panic!("unexpected {:?}", other),
        }
        assert!(e.is_retryable());

        let bad_login = reply(Severity::PermanentNegativeCompletion, Category::Unspecified3, Detail::Five);
        match classify(LettreSmtpError::Permanent(bad_login)) {
            TransportError::Authentication(_) => {}
            other => panic!("unexpected {:?}", other),
        }

        // a negative reply to DATA arrives as a plain response
        let refused = reply(Severity::PermanentNegativeCompletion, Category::MailSystem, Detail::Four);
        match classify(LettreSmtpError::from(refused)) {
            TransportError::Rejected(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
