use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use mailparse::{parse_header, parse_mail, DispositionType, ParsedMail};

use crate::error::{MailError, Result};

const UNNAMED_ATTACHMENT: &str = "unnamed_attachment";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    /// Plain-text parts, in order. `None` when the message has none.
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Splits fetched message bytes into body text and attachments.
///
/// Never fails: the bytes come from the server, and showing part of a
/// message beats showing nothing. Anything that cannot be decoded is logged
/// and left out.
pub fn decode(raw: &[u8]) -> MessageBody {
    let parsed_mail = match parse_mail(raw) {
        Ok(parsed_mail) => parsed_mail,
        Err(err) => {
            warn!("Cannot parse message, showing it empty: {}", err);
            return MessageBody::default();
        }
    };

    if parsed_mail.subparts.is_empty() {
        let text = parsed_mail
            .get_body()
            .map_err(|err| warn!("Cannot decode single-part body: {}", err))
            .ok();
        return MessageBody { text, attachments: Vec::new() };
    }

    let mut texts = Vec::new();
    let mut attachments = Vec::new();
    process_part(&parsed_mail, &mut texts, &mut attachments);

    MessageBody {
        text: if texts.is_empty() { None } else { Some(texts.join("\n")) },
        attachments,
    }
}

fn process_part(part: &ParsedMail, texts: &mut Vec<String>, attachments: &mut Vec<Attachment>) {
    // Recursively process subparts
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            process_part(subpart, texts, attachments);
        }
        return;
    }

    let content_type = part.ctype.mimetype.to_lowercase();

    if let Some(filename) = part_filename(part) {
        match part.get_body_raw() {
            Ok(content) => attachments.push(Attachment { filename, content_type, content }),
            Err(err) => warn!("Cannot decode attachment {}: {}", filename, err),
        }
    } else if content_type == "text/plain" {
        match part.get_body() {
            Ok(text) => texts.push(text),
            Err(err) => warn!("Cannot decode text part: {}", err),
        }
    } else {
        debug!("Skipping {} part", content_type);
    }
}

/// The Content-Disposition filename, falling back to the Content-Type name.
/// An attachment disposition without either still counts, under a
/// placeholder name.
fn part_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
        .or_else(|| {
            (disposition.disposition == DispositionType::Attachment).then(|| UNNAMED_ATTACHMENT.to_string())
        })
}

/// Writes every attachment into `destination`, creating it if needed, and
/// returns how many were written. Repeated names within one call get a
/// `-1`, `-2`, ... suffix. Stops at the first failed write, whose error
/// names the file.
pub fn save_attachments(attachments: &[Attachment], destination: &Path) -> Result<usize> {
    fs::create_dir_all(destination).map_err(|source| MailError::Io {
        path: destination.to_path_buf(),
        source,
    })?;

    let mut taken = HashSet::new();
    for attachment in attachments {
        let path = unique_path(attachment_path(destination, &attachment.filename), &mut taken);
        fs::write(&path, &attachment.content).map_err(|source| MailError::Io { path: path.clone(), source })?;
        debug!("Saved {} ({} bytes)", path.display(), attachment.content.len());
    }
    Ok(attachments.len())
}

/// Only the last component of the reported filename is used so a name like
/// `../../.bashrc` stays inside `destination`.
pub fn attachment_path(destination: &Path, filename: &str) -> PathBuf {
    let name = Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNNAMED_ATTACHMENT.to_string());
    destination.join(name)
}

fn unique_path(path: PathBuf, taken: &mut HashSet<PathBuf>) -> PathBuf {
    if taken.insert(path.clone()) {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| UNNAMED_ATTACHMENT.to_string());
    let extension = path.extension().map(|ext| format!(".{}", ext.to_string_lossy()));

    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("{}-{}{}", stem, n, extension.as_deref().unwrap_or("")));
        if taken.insert(candidate.clone()) {
            warn!("Duplicate attachment name {}, saving as {}", path.display(), candidate.display());
            return candidate;
        }
        n += 1;
    }
}

/// Decodes RFC 2047 encoded words in a raw header value.
pub fn decode_header_text(raw: &[u8]) -> String {
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    match parse_header(&line) {
        Ok((header, _)) => header.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}
