//! Pickup directory transport.
//!
//! Writes each message as a plain-text RFC 5322 file into a directory watched
//! by a local MTA. Files are written under a temporary name and renamed into
//! place so the MTA never picks up a partial message.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use tracing::debug;

use super::{DeliveryError, MailMessage, MailTransport};

/// Drops messages as `.eml` files into a pickup directory.
#[derive(Debug)]
pub struct PickupDirTransport {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl PickupDirTransport {
    /// Create a transport writing into `dir`. The directory is created on
    /// first send.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Directory messages are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Render a message in RFC 5322 form.
///
/// Header values are flattened onto one line and non-ASCII text is written as
/// RFC 2047 encoded words. Body line endings are normalised to CRLF.
pub fn format_message(message: &MailMessage) -> String {
    format!(
        "From: {name} <{address}>\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}",
        name = display_name(&message.from.name),
        address = single_line(&message.from.address),
        to = single_line(&message.to.join(", ")),
        subject = header_text(&message.subject),
        date = Utc::now().to_rfc2822(),
        body = crlf(&message.body),
    )
}

/// Convert any mix of `\r\n`, `\r` and `\n` to CRLF.
fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

/// Replace line breaks and other control characters with spaces.
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Unstructured header text, encoded when it is not plain ASCII.
fn header_text(value: &str) -> String {
    let value = single_line(value);
    if value.is_ascii() {
        value
    } else {
        encoded_word(&value)
    }
}

/// A display name: encoded when not ASCII, quoted when it has specials.
fn display_name(value: &str) -> String {
    let value = single_line(value);
    if !value.is_ascii() {
        return encoded_word(&value);
    }
    if value.chars().any(|c| "()<>[]:;@\\,.\"".contains(c)) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value
    }
}

fn encoded_word(value: &str) -> String {
    format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
}

impl MailTransport for PickupDirTransport {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DeliveryError::Io { path, source }
        };

        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stem = format!(
            "{}-{}-{seq}",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            std::process::id()
        );
        let tmp_path = self.dir.join(format!(".{stem}.tmp"));
        let final_path = self.dir.join(format!("{stem}.eml"));

        std::fs::write(&tmp_path, format_message(message)).map_err(io_error(&tmp_path))?;
        std::fs::rename(&tmp_path, &final_path).map_err(io_error(&final_path))?;

        debug!(path = %final_path.display(), "message written to pickup directory");
        Ok(())
    }
}
