//! Outbound drafts and the step-by-step compose workflow.
//!
//! A compose runs `FieldsEntry → AttachmentsOptional → SigningOptional →
//! Finalized → Sent`. Each step is a method on [`ComposeWorkflow`] that only
//! succeeds in its own stage, so a driver can be tested without a terminal.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use log::{info, warn};

use crate::error::{MailError, Result};
use crate::mail_session::{MailSession, MailStore, MailTransport};
use crate::signing::Signer;

const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// What the user typed in, before any file is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftFields {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachment_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDraft {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    body: String,
    pub attachments: Vec<DraftAttachment>,
    signed: bool,
}

/// Reads every attachment path and assembles the draft. The first path that
/// cannot be read fails the build.
pub fn build(fields: DraftFields) -> Result<OutboundDraft> {
    let attachments = fields
        .attachment_paths
        .iter()
        .map(|path| {
            let content = fs::read(path).map_err(|source| MailError::AttachmentRead {
                path: path.clone(),
                source,
            })?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| MailError::AttachmentRead {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
                })?;
            Ok(DraftAttachment { filename, content })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OutboundDraft {
        sender: fields.sender,
        recipient: fields.recipient,
        subject: fields.subject,
        body: fields.body,
        attachments,
        signed: false,
    })
}

impl OutboundDraft {
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// The headers and body that get signed. Attachments are not part of it.
    pub fn signable_text(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            self.sender, self.recipient, self.subject, self.body
        )
    }

    /// Replaces the body with a clearsigned envelope of
    /// [`signable_text`](Self::signable_text). Leaves the draft untouched on
    /// failure. A signed draft cannot be signed again.
    pub fn apply_signing(&mut self, signer: &dyn Signer, key_id: &str) -> Result<()> {
        if self.signed {
            return Err(MailError::Signing("draft is already signed".to_string()));
        }
        let envelope = signer.clearsign(&self.signable_text(), key_id)?;
        self.body = envelope;
        self.signed = true;
        info!("Draft to {} signed with key {:?}", self.recipient, key_id);
        Ok(())
    }

    /// Serializes the draft into the message handed to SMTP.
    pub fn finalize(&self) -> Result<Message> {
        let builder = Message::builder()
            .from(parse_mailbox(&self.sender)?)
            .to(parse_mailbox(&self.recipient)?)
            .subject(self.subject.clone());
        let text = SinglePart::plain(self.body.clone());

        let message = if self.attachments.is_empty() {
            builder.singlepart(text)
        } else {
            let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
                .map_err(|e| MailError::InvalidMessage(e.to_string()))?;
            let parts = self.attachments.iter().fold(MultiPart::mixed().singlepart(text), |parts, attachment| {
                parts.singlepart(
                    AttachmentPart::new(attachment.filename.clone())
                        .body(attachment.content.clone(), content_type.clone()),
                )
            });
            builder.multipart(parts)
        };
        message.map_err(|e| MailError::InvalidMessage(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse()
        .map_err(|e| MailError::InvalidMessage(format!("bad address {:?}: {}", address, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeStage {
    FieldsEntry,
    AttachmentsOptional,
    SigningOptional,
    Finalized,
    Sent,
    Aborted,
}

impl fmt::Display for ComposeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComposeStage::FieldsEntry => "fields entry",
            ComposeStage::AttachmentsOptional => "attachments",
            ComposeStage::SigningOptional => "signing",
            ComposeStage::Finalized => "finalized",
            ComposeStage::Sent => "sent",
            ComposeStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One compose, from typed fields to a delivered message.
#[derive(Debug)]
pub struct ComposeWorkflow {
    stage: ComposeStage,
    fields: DraftFields,
    draft: Option<OutboundDraft>,
    message: Option<Message>,
}

impl ComposeWorkflow {
    pub fn new(sender: impl Into<String>) -> Self {
        ComposeWorkflow {
            stage: ComposeStage::FieldsEntry,
            fields: DraftFields { sender: sender.into(), ..Default::default() },
            draft: None,
            message: None,
        }
    }

    pub fn stage(&self) -> ComposeStage {
        self.stage
    }

    pub fn draft(&self) -> Option<&OutboundDraft> {
        self.draft.as_ref()
    }

    pub fn enter_fields(&mut self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        self.ensure_stage(ComposeStage::FieldsEntry)?;
        self.fields.recipient = recipient.trim().to_string();
        self.fields.subject = subject.to_string();
        self.fields.body = body.to_string();
        self.stage = ComposeStage::AttachmentsOptional;
        Ok(())
    }

    /// Reads the given files (possibly none) and builds the draft. An
    /// unreadable file aborts the compose.
    pub fn attach(&mut self, paths: Vec<PathBuf>) -> Result<()> {
        self.ensure_stage(ComposeStage::AttachmentsOptional)?;
        let mut fields = std::mem::take(&mut self.fields);
        fields.attachment_paths = paths;
        match build(fields) {
            Ok(draft) => {
                self.draft = Some(draft);
                self.stage = ComposeStage::SigningOptional;
                Ok(())
            }
            Err(err) => self.abort(err),
        }
    }

    /// Signs the draft with the session's engine. On failure the draft stays
    /// unsigned and the workflow stays in the signing stage, so the caller can
    /// still finalize unsigned or give up.
    pub fn sign<S: MailStore, T: MailTransport>(&mut self, session: &MailSession<S, T>) -> Result<()> {
        self.ensure_stage(ComposeStage::SigningOptional)?;
        let draft = self.draft_mut()?;
        session.sign_draft(draft).map_err(|err| {
            warn!("Signing failed, draft left unsigned: {}", err);
            err
        })
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_stage(ComposeStage::SigningOptional)?;
        let finalized = self.draft_mut()?.finalize();
        match finalized {
            Ok(message) => {
                self.message = Some(message);
                self.stage = ComposeStage::Finalized;
                Ok(())
            }
            Err(err) => self.abort(err),
        }
    }

    /// Hands the finalized message to the session. A rejected delivery is
    /// not retried and the compose ends aborted.
    pub async fn send<S: MailStore, T: MailTransport>(&mut self, session: &mut MailSession<S, T>) -> Result<()> {
        self.ensure_stage(ComposeStage::Finalized)?;
        let message = self
            .message
            .take()
            .ok_or_else(|| MailError::Workflow("finalized without a message".to_string()))?;
        match session.send(message).await {
            Ok(()) => {
                self.stage = ComposeStage::Sent;
                info!("Message to {} sent", self.fields_recipient());
                Ok(())
            }
            Err(err) => self.abort(err),
        }
    }

    /// Gives up on the compose; nothing is sent.
    pub fn cancel(&mut self) {
        if self.stage != ComposeStage::Sent {
            self.stage = ComposeStage::Aborted;
        }
    }

    fn fields_recipient(&self) -> &str {
        self.draft.as_ref().map_or(self.fields.recipient.as_str(), |draft| draft.recipient.as_str())
    }

    fn draft_mut(&mut self) -> Result<&mut OutboundDraft> {
        self.draft
            .as_mut()
            .ok_or_else(|| MailError::Workflow("no draft has been built".to_string()))
    }

    fn ensure_stage(&self, stage: ComposeStage) -> Result<()> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(MailError::Workflow(format!("expected {} stage, compose is at {}", stage, self.stage)))
        }
    }

    fn abort(&mut self, err: MailError) -> Result<()> {
        warn!("Compose aborted at {}: {}", self.stage, err);
        self.stage = ComposeStage::Aborted;
        Err(err)
    }
}
