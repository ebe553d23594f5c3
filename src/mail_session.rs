//! One authenticated IMAP + SMTP pair and the operations the client runs
//! against it.
//!
//! The protocol adapters live in [`imap`] and [`smtp`]; everything here is
//! written against the [`MailStore`] / [`MailTransport`] seams so the session
//! rules (bounded fetches, search caps, open/close pairing, per round trip
//! deadlines) do not depend on a live server.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use lettre::Message;
use log::{debug, error, info, warn};

use crate::compose::OutboundDraft;
use crate::credentials::Credentials;
use crate::error::{MailError, Result};
use crate::settings::Config;
use crate::signing::Signer;

pub mod imap;
pub mod smtp;

/// At most this many hits are returned by [`MailSession::search`].
pub const SEARCH_RESULT_LIMIT: usize = 10;

pub type Uid = u32;

/// Header view of one message plus the raw bytes fetched alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub uid: Uid,
    pub date: String,
    /// `mailbox@host` of the first From address.
    pub sender: String,
    pub subject: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub uid: Uid,
    pub subject: String,
    pub sender: String,
}

/// What a store hands back for one UID FETCH item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub date: String,
    pub sender: String,
    pub subject: String,
    /// Present only when the body was requested.
    pub raw: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    All,
    /// Matches the term against Subject or From.
    SubjectOrFrom(String),
}

/// The retrieval side of a session (IMAP).
pub trait MailStore {
    async fn list_folders(&mut self) -> Result<Vec<String>>;
    async fn select(&mut self, folder: &str) -> Result<()>;
    /// UIDs matching `query` in the selected folder, in any order.
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<Uid>>;
    async fn fetch(&mut self, uids: &[Uid], with_body: bool) -> Result<Vec<FetchedMessage>>;
    async fn logout(&mut self) -> Result<()>;
}

/// The delivery side of a session (SMTP).
pub trait MailTransport {
    async fn send(&mut self, message: Message) -> Result<()>;
    async fn quit(&mut self) -> Result<()>;
}

/// Opens the two halves of a session.
pub trait Connector {
    type Store: MailStore;
    type Transport: MailTransport;

    async fn open_store(&self, credentials: &Credentials) -> Result<Self::Store>;
    async fn open_transport(&self, credentials: &Credentials) -> Result<Self::Transport>;
}

/// Where the live session connects to.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub timeout: Duration,
}

impl NetworkConnector {
    pub fn from_config(config: &Config) -> Self {
        NetworkConnector {
            imap_host: config.imap_host.clone(),
            imap_port: config.imap_port,
            smtp_host: config.smtp_host.clone(),
            smtp_port: config.smtp_port,
            timeout: config.round_trip_timeout(),
        }
    }
}

impl Connector for NetworkConnector {
    type Store = imap::ImapStore;
    type Transport = smtp::SmtpRelay;

    async fn open_store(&self, credentials: &Credentials) -> Result<Self::Store> {
        imap::ImapStore::connect(&self.imap_host, self.imap_port, credentials, self.timeout).await
    }

    async fn open_transport(&self, credentials: &Credentials) -> Result<Self::Transport> {
        smtp::SmtpRelay::connect(&self.smtp_host, self.smtp_port, credentials, self.timeout).await
    }
}

pub struct SessionOptions {
    pub round_trip_timeout: Duration,
    /// Key id the signer uses for drafts signed in this session.
    pub signing_key: String,
}

pub struct MailSession<S: MailStore, T: MailTransport> {
    store: S,
    transport: T,
    signer: Box<dyn Signer>,
    signing_key: String,
    timeout: Duration,
    closed: bool,
}

impl<S: MailStore, T: MailTransport> MailSession<S, T> {
    /// Logs in on both protocols. If the SMTP side fails the already open
    /// IMAP side is logged out before the error is returned.
    pub async fn open<C>(
        connector: &C,
        credentials: &Credentials,
        signer: Box<dyn Signer>,
        options: SessionOptions,
    ) -> Result<Self>
    where
        C: Connector<Store = S, Transport = T>,
    {
        let mut store = connector.open_store(credentials).await?;
        let transport = match connector.open_transport(credentials).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!("-- SMTP login failed, closing IMAP connection: {}", err);
                if let Err(close_err) = with_deadline(options.round_trip_timeout, "LOGOUT", store.logout()).await {
                    error!("-- IMAP logout after failed open: {}", close_err);
                }
                return Err(err);
            }
        };

        info!("-- session open for {}", credentials.username);
        Ok(MailSession {
            store,
            transport,
            signer,
            signing_key: options.signing_key,
            timeout: options.round_trip_timeout,
            closed: false,
        })
    }

    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        with_deadline(self.timeout, "LIST", self.store.list_folders()).await
    }

    /// The newest `limit` messages of `folder`, oldest first, with their
    /// envelopes and full raw bodies. Nothing is cached between calls.
    pub async fn fetch_recent(&mut self, folder: &str, limit: usize) -> Result<Vec<MessageSummary>> {
        with_deadline(self.timeout, "SELECT", self.store.select(folder)).await?;
        let mut uids = with_deadline(self.timeout, "SEARCH", self.store.search(&SearchQuery::All)).await?;
        uids.sort_unstable();

        let recent = most_recent(&uids, limit);
        if recent.is_empty() {
            debug!("-- {}: nothing to fetch", folder);
            return Ok(Vec::new());
        }

        let fetched = with_deadline(self.timeout, "FETCH", self.store.fetch(recent, true)).await?;
        let fetched = merge_fetched(recent, fetched);
        info!("-- fetched {} of {} messages from {}", fetched.len(), uids.len(), folder);

        Ok(fetched
            .into_values()
            .map(|message| {
                let raw = message.raw.unwrap_or_else(|| {
                    warn!("-- message {} came back without a body", message.uid);
                    Vec::new()
                });
                MessageSummary {
                    uid: message.uid,
                    date: message.date,
                    sender: message.sender,
                    subject: message.subject,
                    raw,
                }
            })
            .collect())
    }

    /// Subject-or-sender search, capped at the [`SEARCH_RESULT_LIMIT`] most
    /// recent matches. Each hit's envelope is fetched on its own.
    pub async fn search(&mut self, folder: &str, term: &str) -> Result<Vec<SearchHit>> {
        with_deadline(self.timeout, "SELECT", self.store.select(folder)).await?;
        let query = SearchQuery::SubjectOrFrom(term.to_string());
        let mut uids = with_deadline(self.timeout, "SEARCH", self.store.search(&query)).await?;
        uids.sort_unstable();

        let mut hits = Vec::new();
        for &uid in most_recent(&uids, SEARCH_RESULT_LIMIT) {
            let fetched = with_deadline(self.timeout, "FETCH", self.store.fetch(&[uid], false)).await?;
            match fetched.into_iter().find(|message| message.uid == uid) {
                Some(message) => hits.push(SearchHit {
                    uid,
                    subject: message.subject,
                    sender: message.sender,
                }),
                None => warn!("-- search hit {} vanished before its envelope was fetched", uid),
            }
        }
        debug!("-- search {:?} in {}: {} matches, {} shown", term, folder, uids.len(), hits.len());
        Ok(hits)
    }

    /// One delivery attempt, no retry.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        with_deadline(self.timeout, "SEND", self.transport.send(message)).await
    }

    /// Signs `draft` with this session's engine and key.
    pub fn sign_draft(&self, draft: &mut OutboundDraft) -> Result<()> {
        draft.apply_signing(self.signer.as_ref(), &self.signing_key)
    }

    /// Logs out of IMAP and quits SMTP. Both are attempted; the first error
    /// is returned.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        let imap = with_deadline(self.timeout, "LOGOUT", self.store.logout()).await;
        let smtp = with_deadline(self.timeout, "QUIT", self.transport.quit()).await;
        for result in [&imap, &smtp] {
            if let Err(err) = result {
                error!("-- error while closing session: {}", err);
            }
        }
        info!("-- session closed");
        imap.and(smtp)
    }
}

impl<S: MailStore, T: MailTransport> Drop for MailSession<S, T> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("-- mail session dropped without close()");
        }
    }
}

/// Keeps one item per requested uid. Servers may push unsolicited FETCH
/// responses (flag updates, other messages) or split one message over
/// several responses; split parts are folded together, body first.
fn merge_fetched(requested: &[Uid], fetched: Vec<FetchedMessage>) -> BTreeMap<Uid, FetchedMessage> {
    let mut merged: BTreeMap<Uid, FetchedMessage> = BTreeMap::new();
    for message in fetched {
        if requested.binary_search(&message.uid).is_err() {
            debug!("-- ignoring unsolicited FETCH for uid {}", message.uid);
            continue;
        }
        match merged.entry(message.uid) {
            Entry::Vacant(slot) => {
                slot.insert(message);
            }
            Entry::Occupied(mut slot) => {
                let kept = slot.get_mut();
                if kept.raw.is_none() {
                    kept.raw = message.raw;
                }
                for (field, update) in [
                    (&mut kept.date, message.date),
                    (&mut kept.sender, message.sender),
                    (&mut kept.subject, message.subject),
                ] {
                    if field.is_empty() {
                        *field = update;
                    }
                }
            }
        }
    }
    merged
}

/// Tail of an ascending uid list holding at most `limit` entries.
pub fn most_recent(uids: &[Uid], limit: usize) -> &[Uid] {
    &uids[uids.len().saturating_sub(limit)..]
}

async fn with_deadline<F, R>(timeout: Duration, operation: &str, round_trip: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    match tokio::time::timeout(timeout, round_trip).await {
        Ok(result) => result,
        Err(_) => Err(MailError::Transport(format!(
            "{} timed out after {}s",
            operation,
            timeout.as_secs()
        ))),
    }
}
