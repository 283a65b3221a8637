//! IMAP mailbox over raw TCP/TLS.
//!
//! Speaks just enough IMAP4rev1 for the pipeline: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, UID COPY, UID STORE, EXPUNGE and LOGOUT.
//! All socket I/O is blocking and runs inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use secrecy::ExposeSecret;

use crate::config::ImapSettings;
use crate::error::MailboxError;
use crate::pipeline::message::{from_header, is_sender_trusted};
use crate::pipeline::types::{Mailbox, MessageEnvelope};

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest literal accepted from the server.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

// ── Protocol session ────────────────────────────────────────────────

/// Byte stream an IMAP session can run over.
pub trait ImapStream: Read + Write + Send {}

impl<T: Read + Write + Send> ImapStream for T {}

/// One server response line, with any `{N}` literals it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// An authenticated IMAP session with a selected folder.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    tag_counter: u32,
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            tag_counter: 0,
        }
    }

    /// Consume the server greeting.
    pub fn read_greeting(&mut self, host: &str) -> Result<(), MailboxError> {
        let greeting = self.read_response_line()?;
        let upper = greeting.text.to_ascii_uppercase();
        if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::ConnectFailed {
                host: host.to_string(),
                reason: format!("unexpected greeting: {}", greeting.text),
            })
        }
    }

    pub fn login(&mut self, host: &str, username: &str, password: &str) -> Result<(), MailboxError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(MailboxError::CommandFailed { .. }) => Err(MailboxError::AuthFailed {
                host: host.to_string(),
                username: username.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    pub fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(folder)))?;
        Ok(())
    }

    /// UIDs of every message in the selected folder, in mailbox order.
    pub fn uid_search_all(&mut self) -> Result<Vec<String>, MailboxError> {
        let lines = self.command("UID SEARCH ALL")?;
        let mut uids = Vec::new();
        for line in &lines {
            let mut words = line.text.split_whitespace();
            if words.next() == Some("*")
                && words
                    .next()
                    .is_some_and(|w| w.eq_ignore_ascii_case("SEARCH"))
            {
                uids.extend(words.map(str::to_string));
            }
        }
        Ok(uids)
    }

    /// Full RFC 822 bytes of one message, or `None` if the server sent none.
    pub fn uid_fetch_rfc822(&mut self, uid: &str) -> Result<Option<Vec<u8>>, MailboxError> {
        validate_uid(uid)?;
        let lines = self.command(&format!("UID FETCH {uid} RFC822"))?;
        Ok(lines
            .into_iter()
            .filter(|l| l.text.to_ascii_uppercase().contains("FETCH"))
            .find_map(|l| l.literals.into_iter().next()))
    }

    pub fn uid_copy(&mut self, uid: &str, folder: &str) -> Result<(), MailboxError> {
        validate_uid(uid)?;
        self.command(&format!("UID COPY {uid} {}", quote(folder)))?;
        Ok(())
    }

    pub fn uid_store_deleted(&mut self, uid: &str) -> Result<(), MailboxError> {
        validate_uid(uid)?;
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))?;
        Ok(())
    }

    pub fn expunge(&mut self) -> Result<(), MailboxError> {
        self.command("EXPUNGE")?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        match self.command("LOGOUT") {
            // Servers may close the socket right after BYE.
            Ok(_) | Err(MailboxError::Disconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send one tagged command and collect untagged lines until its completion.
    pub fn command(&mut self, command: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_response_line()?;
            let status = line
                .text
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '));
            if let Some(status) = status {
                if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
                    return Ok(untagged);
                }
                return Err(MailboxError::CommandFailed {
                    command: command_label(command),
                    reason: status.trim().to_string(),
                });
            }
            untagged.push(line);
        }
    }

    fn read_response_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut text = String::new();
        let mut literals = Vec::new();
        loop {
            let mut buf = Vec::new();
            if self.stream.read_until(b'\n', &mut buf)? == 0 {
                return Err(MailboxError::Disconnected);
            }
            let chunk = String::from_utf8_lossy(&buf);
            let chunk = chunk.trim_end_matches(['\r', '\n']);
            text.push_str(chunk);
            match literal_length(chunk) {
                Some(len) if len > MAX_LITERAL_SIZE => {
                    return Err(MailboxError::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    literals.push(literal);
                }
                None => return Ok(ResponseLine { text, literals }),
            }
        }
    }
}

/// Length announced by a trailing `{N}` (or `{N+}`) literal marker.
fn literal_length(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].trim_end_matches('+').parse().ok()
}

/// Quote a string argument.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Command name for error reports; never includes arguments (LOGIN carries the password).
fn command_label(command: &str) -> String {
    let mut words = command.split_whitespace();
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("UID") => {
            format!("UID {}", words.next().unwrap_or_default())
        }
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

fn validate_uid(uid: &str) -> Result<(), MailboxError> {
    if !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(MailboxError::Protocol(format!("invalid UID: {uid:?}")))
    }
}

// ── Connection ──────────────────────────────────────────────────────

type Connection = ImapSession<Box<dyn ImapStream>>;

/// Open, authenticate and select the configured folder.
fn connect(settings: &ImapSettings) -> Result<Connection, MailboxError> {
    let tcp = TcpStream::connect((settings.host.as_str(), settings.port)).map_err(|e| {
        MailboxError::ConnectFailed {
            host: settings.host.clone(),
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))?;

    let stream: Box<dyn ImapStream> = if settings.use_ssl {
        Box::new(tls_stream(&settings.host, tcp)?)
    } else {
        Box::new(tcp)
    };

    let mut session = ImapSession::new(stream);
    session.read_greeting(&settings.host)?;
    session.login(
        &settings.host,
        &settings.username,
        settings.password.expose_secret(),
    )?;
    session.select(&settings.folder)?;
    tracing::info!(
        host = %settings.host,
        folder = %settings.folder,
        "IMAP session established"
    );
    Ok(session)
}

fn tls_stream(
    host: &str,
    tcp: TcpStream,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, MailboxError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| MailboxError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Fetch every message whose From header matches `trusted`, in UID order.
///
/// A UID the server refuses to deliver is skipped; connection failures
/// abort the whole fetch.
fn fetch_trusted<S: Read + Write>(
    session: &mut ImapSession<S>,
    trusted: &[String],
) -> Result<Vec<MessageEnvelope>, MailboxError> {
    let uids = session.uid_search_all()?;
    tracing::debug!(count = uids.len(), "IMAP search complete");
    let mut envelopes = Vec::new();
    for uid in uids {
        let raw = match session.uid_fetch_rfc822(&uid) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::warn!(uid = %uid, "FETCH returned no message body");
                continue;
            }
            Err(MailboxError::CommandFailed { reason, .. }) => {
                tracing::warn!(uid = %uid, reason = %reason, "FETCH refused, skipping message");
                continue;
            }
            Err(e) => return Err(e),
        };
        let from = MessageParser::default()
            .parse_headers(&raw)
            .map(|m| from_header(&m))
            .unwrap_or_default();
        if is_sender_trusted(trusted, &from) {
            envelopes.push(MessageEnvelope::new(uid, raw));
        } else {
            tracing::debug!(uid = %uid, from = %from, "Skipping untrusted sender");
        }
    }
    Ok(envelopes)
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP-backed [`Mailbox`].
///
/// The session is opened on first use and reused for the rest of the run.
pub struct ImapMailbox {
    settings: ImapSettings,
    archive_folder: Option<String>,
    session: Arc<Mutex<Option<Connection>>>,
}

impl ImapMailbox {
    pub fn new(settings: ImapSettings, archive_folder: Option<String>) -> Self {
        Self {
            settings,
            archive_folder,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Log out and drop the session, if one is open.
    pub async fn close(&self) {
        let slot = Arc::clone(&self.session);
        let result = tokio::task::spawn_blocking(move || {
            let taken = slot.lock().ok().and_then(|mut guard| guard.take());
            match taken {
                Some(mut session) => session.logout(),
                None => Ok(()),
            }
        })
        .await;
        match result {
            Ok(Ok(())) => tracing::debug!("IMAP session closed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "IMAP logout failed"),
            Err(e) => tracing::warn!(error = %e, "IMAP logout task failed"),
        }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, MailboxError> + Send + 'static,
    {
        let slot = Arc::clone(&self.session);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| MailboxError::Protocol("IMAP session lock poisoned".into()))?;
            if guard.is_none() {
                *guard = Some(connect(&settings)?);
            }
            let session = guard.as_mut().ok_or(MailboxError::Disconnected)?;
            let result = op(session);
            // A broken socket cannot be reused; reconnect on next call.
            if matches!(result, Err(MailboxError::Io(_) | MailboxError::Disconnected)) {
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task failed: {e}")))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_messages(
        &self,
        trusted_senders: &[String],
    ) -> Result<Vec<MessageEnvelope>, MailboxError> {
        let trusted = trusted_senders.to_vec();
        self.with_session(move |session| fetch_trusted(session, &trusted))
            .await
    }

    async fn delete_message(&self, uid: &str) -> Result<(), MailboxError> {
        let uid = uid.to_string();
        let archive = self.archive_folder.clone();
        self.with_session(move |session| {
            if let Some(folder) = &archive {
                session.uid_copy(&uid, folder)?;
                tracing::debug!(uid = %uid, folder = %folder, "Archived message");
            }
            session.uid_store_deleted(&uid)?;
            session.expunge()
        })
        .await
    }

    async fn mark_failed(&self, uid: &str) {
        tracing::warn!(uid = %uid, "Message left in mailbox after failure");
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock()
            && let Some(mut session) = guard.take()
        {
            let _ = session.logout();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Replays canned server output and records what the client wrote.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(server: &str) -> Self {
            Self {
                input: Cursor::new(server.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(server: &str) -> ImapSession<Scripted> {
        ImapSession::new(Scripted::new(server))
    }

    fn sent(session: &ImapSession<Scripted>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().output).to_string()
    }

    #[test]
    fn literal_length_parses_marker() {
        assert_eq!(literal_length("* 1 FETCH (UID 7 RFC822 {42}"), Some(42));
        assert_eq!(literal_length("* 1 FETCH (RFC822 {5+}"), Some(5));
        assert_eq!(literal_length("A1 OK done"), None);
        assert_eq!(literal_length("{oops}"), None);
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn command_label_hides_arguments() {
        assert_eq!(command_label("LOGIN \"u\" \"secret\""), "LOGIN");
        assert_eq!(command_label("UID FETCH 7 RFC822"), "UID FETCH");
    }

    #[test]
    fn greeting_and_login() {
        let mut s = session("* OK IMAP4rev1 ready\r\nA1 OK LOGIN completed\r\n");
        s.read_greeting("imap.example.com").unwrap();
        s.login("imap.example.com", "user", "pw").unwrap();
        assert_eq!(sent(&s), "A1 LOGIN \"user\" \"pw\"\r\n");
    }

    #[test]
    fn bad_greeting_is_connect_error() {
        let mut s = session("* BYE go away\r\n");
        let err = s.read_greeting("imap.example.com").unwrap_err();
        assert!(matches!(err, MailboxError::ConnectFailed { .. }));
    }

    #[test]
    fn rejected_login_is_auth_error() {
        let mut s = session("A1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        let err = s.login("imap.example.com", "user", "pw").unwrap_err();
        assert!(matches!(err, MailboxError::AuthFailed { ref username, .. } if username == "user"));
    }

    #[test]
    fn search_collects_uids_in_order() {
        let mut s = session("* SEARCH 3 9 12\r\nA1 OK SEARCH completed\r\n");
        assert_eq!(s.uid_search_all().unwrap(), vec!["3", "9", "12"]);
    }

    #[test]
    fn search_with_no_results() {
        let mut s = session("* SEARCH\r\nA1 OK SEARCH completed\r\n");
        assert!(s.uid_search_all().unwrap().is_empty());
    }

    #[test]
    fn fetch_reads_literal_exactly() {
        // The literal contains a line that looks like a tagged response.
        let body = "From: a@b.c\r\nA1 OK not really\r\n\r\nhi";
        let server = format!(
            "* 1 FETCH (UID 7 RFC822 {{{}}}\r\n{body})\r\nA1 OK FETCH completed\r\n",
            body.len()
        );
        let mut s = session(&server);
        let raw = s.uid_fetch_rfc822("7").unwrap().unwrap();
        assert_eq!(raw, body.as_bytes());
        assert_eq!(sent(&s), "A1 UID FETCH 7 RFC822\r\n");
    }

    #[test]
    fn oversized_literal_is_rejected() {
        let mut s = session("* 1 FETCH (RFC822 {999999999999}\r\n");
        let err = s.uid_fetch_rfc822("1").unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(ref m) if m.contains("too large")));
    }

    #[test]
    fn refused_fetch_skips_only_that_message() {
        let body = "From: Alice <alice@example.com>\r\nSubject: hi\r\n\r\nhello";
        let server = format!(
            "* SEARCH 1 2\r\nA1 OK SEARCH completed\r\n\
             A2 NO message unavailable\r\n\
             * 2 FETCH (UID 2 RFC822 {{{}}}\r\n{body})\r\nA3 OK FETCH completed\r\n",
            body.len()
        );
        let mut s = session(&server);
        let envelopes = fetch_trusted(&mut s, &["alice@example.com".to_string()]).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].uid, "2");
        assert_eq!(envelopes[0].raw, body.as_bytes());
    }

    #[test]
    fn dropped_connection_during_fetch_aborts() {
        let mut s = session("* SEARCH 1 2\r\nA1 OK SEARCH completed\r\n");
        let err = fetch_trusted(&mut s, &["alice@example.com".to_string()]).unwrap_err();
        assert!(matches!(err, MailboxError::Disconnected));
    }

    #[test]
    fn untrusted_senders_are_filtered_out() {
        let body = "From: Mallory <mallory@example.org>\r\n\r\nx";
        let server = format!(
            "* SEARCH 4\r\nA1 OK SEARCH completed\r\n\
             * 1 FETCH (UID 4 RFC822 {{{}}}\r\n{body})\r\nA2 OK FETCH completed\r\n",
            body.len()
        );
        let mut s = session(&server);
        let envelopes = fetch_trusted(&mut s, &["alice@example.com".to_string()]).unwrap();
        assert!(envelopes.is_empty());
    }

    #[test]
    fn fetch_without_literal_returns_none() {
        let mut s = session("A1 OK FETCH completed\r\n");
        assert_eq!(s.uid_fetch_rfc822("7").unwrap(), None);
    }

    #[test]
    fn invalid_uid_rejected_before_sending() {
        let mut s = session("");
        let err = s.uid_store_deleted("1 OR 2").unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(_)));
        assert_eq!(sent(&s), "");
    }

    #[test]
    fn delete_sequence_commands() {
        let mut s = session(
            "A1 OK COPY completed\r\nA2 OK STORE completed\r\n* 1 EXPUNGE\r\nA3 OK EXPUNGE completed\r\n",
        );
        s.uid_copy("7", "Archive").unwrap();
        s.uid_store_deleted("7").unwrap();
        s.expunge().unwrap();
        assert_eq!(
            sent(&s),
            "A1 UID COPY 7 \"Archive\"\r\nA2 UID STORE 7 +FLAGS.SILENT (\\Deleted)\r\nA3 EXPUNGE\r\n"
        );
    }

    #[test]
    fn failed_command_reports_status() {
        let mut s = session("A1 NO [TRYCREATE] Mailbox does not exist\r\n");
        let err = s.select("Missing").unwrap_err();
        match err {
            MailboxError::CommandFailed { command, reason } => {
                assert_eq!(command, "SELECT");
                assert!(reason.contains("TRYCREATE"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn closed_connection_is_disconnected() {
        let mut s = session("* SEARCH 1\r\n");
        let err = s.uid_search_all().unwrap_err();
        assert!(matches!(err, MailboxError::Disconnected));
    }

    #[test]
    fn logout_tolerates_immediate_close() {
        let mut s = session("* BYE logging out\r\n");
        s.logout().unwrap();
    }

    #[test]
    fn tag_prefix_does_not_match_longer_tag() {
        let mut s = ImapSession::new(Scripted::new("A10 OK stray\r\nA1 OK done\r\n"));
        let lines = s.command("NOOP").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "A10 OK stray");
    }
}
