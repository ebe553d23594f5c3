use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use log::debug;

use crate::error::{MailError, Result};

/// Produces an ASCII-armored, clearsigned copy of a text.
pub trait Signer {
    fn clearsign(&self, text: &str, key_id: &str) -> Result<String>;
}

/// Signs by running the `gpg` binary, using whatever keyring and agent the
/// user already has configured.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    program: String,
}

impl Default for GpgSigner {
    fn default() -> Self {
        GpgSigner { program: "gpg".to_string() }
    }
}

impl GpgSigner {
    pub fn with_program(program: impl Into<String>) -> Self {
        GpgSigner { program: program.into() }
    }
}

impl Signer for GpgSigner {
    fn clearsign(&self, text: &str, key_id: &str) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(["--batch", "--yes", "--armor", "--clearsign"]);
        if !key_id.is_empty() {
            command.args(["--local-user", key_id]);
        }
        debug!("running {} --clearsign for key {:?}", self.program, key_id);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MailError::Signing(format!("cannot start {}: {}", self.program, e)))?;

        // gpg streams its output, so feed stdin from another thread to keep
        // a full stdout pipe from blocking the write.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MailError::Signing("gpg stdin unavailable".to_string()))?;
        let input = text.as_bytes().to_vec();
        let writer = thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .map_err(|e| MailError::Signing(format!("{} did not finish: {}", self.program, e)))?;
        let fed = writer.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MailError::Signing(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        match fed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(MailError::Signing(format!("cannot feed {}: {}", self.program, e))),
            Err(_) => return Err(MailError::Signing("gpg input thread panicked".to_string())),
        }

        String::from_utf8(output.stdout)
            .map_err(|e| MailError::Signing(format!("signature is not UTF-8: {}", e)))
    }
}

/// In-process signing through libgpgme.
#[cfg(feature = "gpgme")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GpgmeSigner;

#[cfg(feature = "gpgme")]
impl Signer for GpgmeSigner {
    fn clearsign(&self, text: &str, key_id: &str) -> Result<String> {
        let signing = |e: gpgme::Error| MailError::Signing(e.to_string());

        let mut ctx = gpgme::Context::from_protocol(gpgme::Protocol::OpenPgp).map_err(signing)?;
        ctx.set_armor(true);
        if !key_id.is_empty() {
            let key = ctx.get_secret_key(key_id).map_err(signing)?;
            ctx.add_signer(&key).map_err(signing)?;
        }

        let mut signed = Vec::new();
        ctx.sign_clear(text.as_bytes(), &mut signed).map_err(signing)?;
        String::from_utf8(signed).map_err(|e| MailError::Signing(format!("signature is not UTF-8: {}", e)))
    }
}
