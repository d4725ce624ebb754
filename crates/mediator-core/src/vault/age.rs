// crates/mediator-core/src/vault/age.rs
// ============================================================================
// Module: Age Vault Backend
// Description: Encrypted vault records decrypted through the `age` CLI.
// Purpose: Read the on-disk vault layout without holding plaintext at rest.
// Dependencies: std::process
// ============================================================================

//! ## Overview
//! Layout under the vault root:
//!
//! ```text
//! templates/<template_id>_v<version>.json.age
//! capsets/<template_id>_v<version>.json.age
//! manifests/<template_id>_v<version>.manifest.json
//! keys/authority_verify.pub
//! ```
//!
//! Each record is decrypted on demand by running `age --decrypt -i
//! <identity> <file>` with a bounded wall-clock budget. The identity file must
//! not be accessible to group or other. Encryption for publishing runs
//! `age -r <recipient>` over stdin.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crate::core::TemplateId;
use crate::core::TemplateVersion;
use crate::core::ensure_owner_only;
use crate::interfaces::EntryKind;
use crate::interfaces::VaultBackend;
use crate::interfaces::VaultError;
use crate::vault::entries::encrypted_entry_path;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default budget for one `age` invocation.
pub const DEFAULT_AGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for the child process.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// SECTION: CLI Runner
// ============================================================================

/// Location and time budget of the `age` executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeCli {
    /// Executable path or name resolved through `PATH`.
    pub binary: PathBuf,
    /// Wall-clock budget per invocation.
    pub timeout: Duration,
}

impl Default for AgeCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("age"),
            timeout: DEFAULT_AGE_TIMEOUT,
        }
    }
}

impl AgeCli {
    /// Runs `age` with `args`, feeding `stdin`, and returns stdout.
    fn run(&self, args: &[&std::ffi::OsStr], stdin: Option<&[u8]>) -> Result<Vec<u8>, VaultError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| VaultError::Backend(format!("failed to run age: {err}")))?;
        let writer = feed(child.stdin.take(), stdin.map(<[u8]>::to_vec));
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        // The writer thread exits once the killed child closes its stdin.
        let status = self.wait(&mut child)?;
        let stdout = join(stdout)?;
        if !status.success() {
            let stderr = join(stderr).unwrap_or_default();
            return Err(VaultError::Backend(format!(
                "age exited with {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        writer
            .join()
            .map_err(|_| VaultError::Backend("age input writer panicked".to_string()))?
            .map_err(|err| VaultError::Backend(format!("failed to write to age: {err}")))?;
        Ok(stdout)
    }

    /// Waits for `child`, killing it when the budget is exhausted.
    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, VaultError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VaultError::Backend("age timed out".to_string()));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => return Err(VaultError::Backend(err.to_string())),
            }
        }
    }
}

/// Writes `input` to the child's stdin on a helper thread, then closes it.
fn feed<W>(pipe: Option<W>, input: Option<Vec<u8>>) -> thread::JoinHandle<std::io::Result<()>>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        if let (Some(mut pipe), Some(input)) = (pipe, input) {
            pipe.write_all(&input)?;
        }
        Ok(())
    })
}

/// Reads a child pipe to completion on a helper thread.
fn drain<R>(pipe: Option<R>) -> thread::JoinHandle<std::io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut bytes)?;
        }
        Ok(bytes)
    })
}

/// Collects the output of a drain thread.
fn join(handle: thread::JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, VaultError> {
    handle
        .join()
        .map_err(|_| VaultError::Backend("age output reader panicked".to_string()))?
        .map_err(|err| VaultError::Backend(format!("failed to read age output: {err}")))
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// Vault backend reading age-encrypted records from a directory.
#[derive(Debug, Clone)]
pub struct AgeCliBackend {
    /// Vault root directory.
    vault_dir: PathBuf,
    /// Private identity used for decryption.
    identity_file: PathBuf,
    /// `age` executable settings.
    cli: AgeCli,
}

impl AgeCliBackend {
    /// Creates a backend after checking the identity file permissions.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Key`] when the identity file is missing or is
    /// accessible to group or other.
    pub fn new(vault_dir: &Path, identity_file: &Path, cli: AgeCli) -> Result<Self, VaultError> {
        ensure_owner_only(identity_file)
            .map_err(|err| VaultError::Key(format!("age identity: {err}")))?;
        Ok(Self {
            vault_dir: vault_dir.to_path_buf(),
            identity_file: identity_file.to_path_buf(),
            cli,
        })
    }
}

impl VaultBackend for AgeCliBackend {
    fn fetch(
        &self,
        kind: EntryKind,
        template_id: &TemplateId,
        version: &TemplateVersion,
    ) -> Result<Option<Vec<u8>>, VaultError> {
        let path = self.vault_dir.join(encrypted_entry_path(kind, template_id, version));
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                let detail = format!("{} is not a regular file", path.display());
                return Err(VaultError::Invalid(detail));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(VaultError::Backend(err.to_string())),
        }
        let args = [
            std::ffi::OsStr::new("--decrypt"),
            std::ffi::OsStr::new("-i"),
            self.identity_file.as_os_str(),
            path.as_os_str(),
        ];
        self.cli.run(&args, None).map(Some)
    }
}

// ============================================================================
// SECTION: Encryption
// ============================================================================

/// Encrypts publish bundles for one `age` recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeEncryptor {
    /// `age` executable settings.
    pub cli: AgeCli,
    /// Recipient public key.
    pub recipient: String,
}

impl AgeEncryptor {
    /// Encrypts `plaintext` to the recipient.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Backend`] when `age` fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let args = [std::ffi::OsStr::new("-r"), std::ffi::OsStr::new(&self.recipient)];
        self.cli.run(&args, Some(plaintext))
    }
}
