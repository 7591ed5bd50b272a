use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use email_format::Email;
use uuid::Uuid;

use crate::error::Error;
use crate::recipient::Recipient;

// RFC 2045 line limit for base64 bodies
const BASE64_LINE: usize = 76;
// Source bytes per encoded-word, keeps each word under 75 characters
const WORD_BYTES: usize = 45;

/// A file sent along with every message of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new<N: Into<String>>(filename: N, content: Vec<u8>) -> Attachment {
        Attachment {
            filename: filename.into(),
            content,
        }
    }

    /// Read the whole file; the attachment is named after its last path
    /// component.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Attachment, Error> {
        let path = path.as_ref();
        let content = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned());
        Ok(Attachment::new(filename, content))
    }
}

/// Subject and body shared by every message of a run. The body carries one
/// placeholder token that is replaced with each recipient's first name.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub subject: String,
    pub body: String,
    pub placeholder: String,
    pub attachment: Option<Attachment>,
}

impl Template {
    pub fn new<S, B, P>(subject: S, body: B, placeholder: P) -> Template
    where
        S: Into<String>,
        B: Into<String>,
        P: Into<String>,
    {
        Template {
            subject: subject.into(),
            body: body.into(),
            placeholder: placeholder.into(),
            attachment: None,
        }
    }

    /// Read subject and body files; surrounding whitespace is dropped.
    pub fn load<S: AsRef<Path>, B: AsRef<Path>>(
        subject_path: S,
        body_path: B,
        placeholder: &str,
    ) -> Result<Template, Error> {
        let subject = fs::read_to_string(subject_path)?;
        let body = fs::read_to_string(body_path)?;
        Ok(Template::new(subject.trim(), body.trim(), placeholder))
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Template {
        self.attachment = Some(attachment);
        self
    }

    pub fn render_body(&self, recipient: &Recipient) -> String {
        if self.placeholder.is_empty() {
            return self.body.clone();
        }
        self.body.replace(&*self.placeholder, recipient.first_name())
    }

    /// Build the wire form of the message for one recipient.
    ///
    /// The body goes out as base64 UTF-8 text; with an attachment the
    /// message becomes `multipart/mixed` with the file as a second part.
    pub fn prepare(
        &self,
        recipient: &Recipient,
        from: &str,
        date: DateTime<Local>,
        helo_name: &str,
    ) -> Result<PreparedEmail, Error> {
        let mut email = Email::new(from, &*date.to_rfc2822()).map_err(parse_error)?;
        email.set_to(&*recipient.email_addr).map_err(parse_error)?;
        email
            .set_subject(&*encode_words(&self.subject))
            .map_err(parse_error)?;

        let message_id = format!("{}@{}", Uuid::new_v4().hyphenated(), helo_name);
        email
            .set_message_id(&*format!("<{}>", message_id))
            .map_err(parse_error)?;

        // email-format only takes 7-bit bodies, so it renders the header
        // block and the MIME structure is appended here
        let headers = format!("{}", email);
        let mut message = headers.trim_end_matches(|c| c == '\r' || c == '\n').to_owned();
        message.push_str("\r\nMIME-Version: 1.0\r\n");

        let text = text_part(&self.render_body(recipient));
        match self.attachment {
            None => message.push_str(&text),
            Some(ref attachment) => {
                let boundary = format!("=_{}", Uuid::new_v4().simple());
                message.push_str(&format!(
                    "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
                    boundary
                ));
                message.push_str(&format!("--{}\r\n", boundary));
                message.push_str(&text);
                message.push_str(&format!("--{}\r\n", boundary));
                message.push_str(&attachment_part(attachment));
                message.push_str(&format!("--{}--\r\n", boundary));
            }
        }

        Ok(PreparedEmail {
            to: recipient.email_addr.clone(),
            from: from.to_owned(),
            message_id,
            message: message.into_bytes(),
        })
    }
}

fn parse_error<E: ::std::fmt::Debug>(e: E) -> Error {
    Error::Message(format!("{:?}", e))
}

// RFC 5322 bodies use CRLF line endings
fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

fn text_part(text: &str) -> String {
    format!(
        "Content-Type: text/plain; charset=utf-8\r\n\
         Content-Transfer-Encoding: base64\r\n\r\n{}",
        base64_lines(crlf(text).as_bytes())
    )
}

fn attachment_part(attachment: &Attachment) -> String {
    let name = quoted(&encode_words(&attachment.filename));
    format!(
        "Content-Type: application/octet-stream; name={}\r\n\
         Content-Transfer-Encoding: base64\r\n\
         Content-Disposition: attachment; filename={}\r\n\r\n{}",
        name,
        name,
        base64_lines(&attachment.content)
    )
}

fn base64_lines(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % BASE64_LINE == 0 {
            out.push_str("\r\n");
        }
        out.push(c);
    }
    out.push_str("\r\n");
    out
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// RFC 2047 `B` encoded-words for header text that is not plain ASCII;
/// anything else is returned as is.
pub fn encode_words(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) && !text.contains("=?") {
        return text.to_owned();
    }

    let mut words: Vec<String> = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if !chunk.is_empty() && chunk.len() + c.len_utf8() > WORD_BYTES {
            words.push(format!("=?utf-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join(" ")
}

/// An email, prepared for delivery to a single recipient.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreparedEmail {
    pub to: String,
    pub from: String,
    pub message_id: String,
    pub message: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template() -> Template {
        Template::new("Hello", "Hi [Placeholder],\nsee you soon.\n[Placeholder]!", "[Placeholder]")
    }

    fn date() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    // Decode the base64 section that follows `marker`
    fn decode_after(text: &str, marker: &str) -> Vec<u8> {
        let start = text.find(marker).unwrap() + marker.len();
        let rest = &text[start..];
        let rest = &rest[rest.find("\r\n\r\n").unwrap() + 4..];
        let end = rest.find("--").unwrap_or_else(|| rest.len());
        let encoded: String = rest[..end].split("\r\n").collect();
        STANDARD.decode(encoded).unwrap()
    }

    #[test]
    fn every_placeholder_gets_the_first_name() {
        let t = template();
        let alice = Recipient::new("Alice Anders", "a@x.com");
        let bob = Recipient::new("Bob", "b@x.com");

        assert_eq!(t.render_body(&alice), "Hi Alice,\nsee you soon.\nAlice!");
        // rendering must not consume the template
        assert_eq!(t.render_body(&bob), "Hi Bob,\nsee you soon.\nBob!");
    }

    #[test]
    fn prepared_email_carries_headers_and_body() {
        let t = template();
        let prepared = t
            .prepare(&Recipient::new("Alice A", "a@x.com"), "me@example.com", date(), "example.com")
            .unwrap();

        assert_eq!(prepared.to, "a@x.com");
        assert_eq!(prepared.from, "me@example.com");
        assert!(prepared.message_id.ends_with("@example.com"));

        let text = String::from_utf8(prepared.message).unwrap();
        assert!(text.contains("Subject: Hello\r\n"));
        assert!(text.contains("MIME-Version: 1.0\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains(&*prepared.message_id));
        assert!(text.is_ascii());

        let body = decode_after(&text, "Content-Type: text/plain");
        assert_eq!(body, b"Hi Alice,\r\nsee you soon.\r\nAlice!");
    }

    #[test]
    fn non_ascii_names_and_text_are_encoded() {
        let t = Template::new("Caf\u{e9} \u{2014} offer", "Hola [Placeholder] \u{2014} \u{a1}saludos!", "[Placeholder]");
        let prepared = t
            .prepare(&Recipient::new("Jos\u{e9} N\u{fa}\u{f1}ez", "j@x.com"), "me@example.com", date(), "example.com")
            .unwrap();

        let text = String::from_utf8(prepared.message).unwrap();
        assert!(text.is_ascii());
        assert!(text.contains("Subject: =?utf-8?B?"));

        let body = decode_after(&text, "Content-Type: text/plain");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "Hola Jos\u{e9} \u{2014} \u{a1}saludos!"
        );
    }

    #[test]
    fn attachment_goes_in_its_own_part() {
        let t = template().with_attachment(Attachment::new("brochure.pdf", b"%PDF-1.4 \x00\xff".to_vec()));
        let prepared = t
            .prepare(&Recipient::new("Alice A", "a@x.com"), "me@example.com", date(), "example.com")
            .unwrap();

        let text = String::from_utf8(prepared.message).unwrap();
        assert!(text.contains("Content-Type: multipart/mixed; boundary=\"=_"));
        assert!(text.contains("Content-Type: application/octet-stream; name=\"brochure.pdf\""));
        assert!(text.contains("Content-Disposition: attachment; filename=\"brochure.pdf\""));
        assert!(text.trim_end().ends_with("--"));

        assert_eq!(
            decode_after(&text, "Content-Type: text/plain"),
            b"Hi Alice,\r\nsee you soon.\r\nAlice!"
        );
        assert_eq!(
            decode_after(&text, "Content-Type: application/octet-stream"),
            b"%PDF-1.4 \x00\xff"
        );
    }

    #[test]
    fn long_header_text_splits_into_words() {
        let subject: String = std::iter::repeat('\u{e9}').take(60).collect();
        let encoded = encode_words(&subject);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
        let decoded: Vec<u8> = words
            .iter()
            .flat_map(|w| STANDARD.decode(&w[10..w.len() - 2]).unwrap())
            .collect();
        assert_eq!(String::from_utf8(decoded).unwrap(), subject);

        assert_eq!(encode_words("plain words"), "plain words");
    }

    #[test]
    fn load_trims_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let subject = dir.path().join("subject.txt");
        let body = dir.path().join("body.txt");
        fs::write(&subject, "  Greetings \n").unwrap();
        fs::write(&body, "\nDear [Placeholder]\n\n").unwrap();

        let t = Template::load(&subject, &body, "[Placeholder]").unwrap();
        assert_eq!(t.subject, "Greetings");
        assert_eq!(t.body, "Dear [Placeholder]");
        assert_eq!(t.attachment, None);
    }

    #[test]
    fn attachment_is_named_after_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cv.pdf");
        fs::write(&path, b"data").unwrap();

        let a = Attachment::load(&path).unwrap();
        assert_eq!(a.filename, "cv.pdf");
        assert_eq!(a.content, b"data");
        assert!(Attachment::load(dir.path().join("missing.pdf")).is_err());
    }
}
