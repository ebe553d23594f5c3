use std::borrow::Cow;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::credentials::Credentials;
use crate::error::{MailError, Result};
use crate::mail_session::{FetchedMessage, MailStore, SearchQuery, Uid};
use crate::message_view::decode_header_text;
use log::{debug, info};

type ImapStream = Compat<tokio_native_tls::TlsStream<TcpStream>>;

const ENVELOPE_QUERY: &str = "(UID ENVELOPE)";
const ENVELOPE_AND_BODY_QUERY: &str = "(UID ENVELOPE BODY.PEEK[])";

fn transport(err: async_imap::error::Error) -> MailError {
    MailError::Transport(err.to_string())
}

// Establish a TLS-encrypted connection to the IMAP server
async fn connect_to_server(server: &str, port: u16) -> anyhow::Result<tokio_native_tls::TlsStream<TcpStream>> {
    let imap_addr = (server, port);
    let tcp_stream = TcpStream::connect(imap_addr).await?;
    let tls = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
    let tls_stream = tls.connect(server, tcp_stream).await?;

    info!("-- connected to {}:{}", server, port);
    Ok(tls_stream)
}

// Login to the IMAP server and return an authenticated session
async fn login_to_server(
    client: Client<ImapStream>,
    username: &str,
    password: &str,
) -> Result<Session<ImapStream>> {
    let imap_session = client
        .login(username, password)
        .await
        .map_err(|(e, _client)| MailError::Authentication(e.to_string()))?;

    info!("-- logged in as {}", username);
    Ok(imap_session)
}

/// An authenticated IMAP session over implicit TLS.
pub struct ImapStore {
    session: Session<ImapStream>,
    /// Server takes `{n+}` literals without a continuation round trip.
    literal_plus: bool,
}

impl ImapStore {
    /// Connects and logs in; a connect that outlasts `timeout` counts as an
    /// unreachable host.
    pub async fn connect(host: &str, port: u16, credentials: &Credentials, timeout: Duration) -> Result<Self> {
        let tls_stream = tokio::time::timeout(timeout, connect_to_server(host, port))
            .await
            .map_err(|_| MailError::Authentication(format!("{}:{} did not answer within {}s", host, port, timeout.as_secs())))?
            .map_err(|e| MailError::Authentication(format!("cannot reach {}:{}: {}", host, port, e)))?;
        let client = Client::new(tls_stream.compat());

        let mut session = tokio::time::timeout(timeout, login_to_server(client, &credentials.username, credentials.secret()))
            .await
            .map_err(|_| MailError::Authentication(format!("{} did not answer LOGIN within {}s", host, timeout.as_secs())))??;
        let literal_plus = match session.capabilities().await {
            Ok(capabilities) => capabilities.has_str("LITERAL+") || capabilities.has_str("LITERAL-"),
            Err(err) => {
                debug!("-- CAPABILITY failed, assuming no LITERAL+: {}", err);
                false
            }
        };
        Ok(ImapStore { session, literal_plus })
    }
}

impl MailStore for ImapStore {
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        let names: Vec<_> = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(transport)?
            .try_collect()
            .await
            .map_err(transport)?;

        Ok(names.iter().map(|name| folder_name(name.name())).collect())
    }

    async fn select(&mut self, folder: &str) -> Result<()> {
        let mailbox = self.session.select(folder).await.map_err(transport)?;
        info!("-- {} selected ({} messages)", folder, mailbox.exists);
        Ok(())
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<Uid>> {
        let command = search_command(query, self.literal_plus);
        debug!("-- UID SEARCH {}", command);
        let uids = self.session.uid_search(&command).await.map_err(transport)?;
        Ok(uids.into_iter().collect())
    }

    async fn fetch(&mut self, uids: &[Uid], with_body: bool) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let uid_set = uids.iter().map(Uid::to_string).collect::<Vec<_>>().join(",");
        let query = if with_body { ENVELOPE_AND_BODY_QUERY } else { ENVELOPE_QUERY };

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(&uid_set, query)
            .await
            .map_err(transport)?
            .try_collect()
            .await
            .map_err(transport)?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                Some(fetched_message(uid, fetch, with_body))
            })
            .collect())
    }

    async fn logout(&mut self) -> Result<()> {
        // Be nice to the server and log out
        self.session.logout().await.map_err(transport)
    }
}

fn fetched_message(uid: Uid, fetch: &Fetch, with_body: bool) -> FetchedMessage {
    let mut message = FetchedMessage {
        uid,
        raw: if with_body { fetch.body().map(<[u8]>::to_vec) } else { None },
        ..Default::default()
    };

    if let Some(envelope) = fetch.envelope() {
        message.date = header_text(&envelope.date);
        message.subject = header_text(&envelope.subject);
        message.sender = envelope
            .from
            .as_ref()
            .and_then(|addresses| addresses.first())
            .map(|address| format!("{}@{}", header_text(&address.mailbox), header_text(&address.host)))
            .unwrap_or_default();
    }
    message
}

fn header_text(value: &Option<Cow<'_, [u8]>>) -> String {
    value.as_deref().map(decode_header_text).unwrap_or_default()
}

/// Some servers hand back quoted names; strip the quoting so the name can be
/// passed straight back to SELECT.
pub fn folder_name(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(|inner| inner.replace("\\\"", "\"").replace("\\\\", "\\"))
        .unwrap_or_else(|| trimmed.to_string())
}

/// Renders a query as UID SEARCH arguments.
///
/// ASCII terms go out as quoted strings. Non-ASCII terms need `CHARSET
/// UTF-8`, and since quoted strings are 7-bit they are sent as
/// non-synchronizing literals when the server allows them. Otherwise they
/// fall back to 8-bit quoted strings, which lenient servers accept.
pub fn search_command(query: &SearchQuery, literal_plus: bool) -> String {
    match query {
        SearchQuery::All => "ALL".to_string(),
        SearchQuery::SubjectOrFrom(term) if term.is_ascii() => {
            let quoted = quote(term);
            format!("OR SUBJECT {} FROM {}", quoted, quoted)
        }
        SearchQuery::SubjectOrFrom(term) => {
            // LITERAL- only covers literals up to 4096 bytes
            let argument = if literal_plus && term.len() <= 4096 {
                format!("{{{}+}}\r\n{}", term.len(), term)
            } else {
                quote(term)
            };
            format!("CHARSET UTF-8 OR SUBJECT {} FROM {}", argument, argument)
        }
    }
}

fn quote(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
