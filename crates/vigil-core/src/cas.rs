//! Content-addressed store client: the four-verb Kubo (IPFS) surface.
//!
//! The pipeline only ever needs *put blob -> CID*, *point name at CID*,
//! *list name keys*, and *resolve name -> CID*, so that is the whole
//! [`Cas`] trait. The shipped implementation, [`KuboCli`], drives the
//! `ipfs` binary non-interactively and parses its stdout; a typed client
//! over the Kubo HTTP API can implement the same trait without touching
//! the pipeline.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors from CAS interactions.
#[derive(Debug, Error)]
pub enum CasError {
    /// The client binary could not be spawned.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// The command line that failed.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The client ran but reported failure.
    #[error("{command} failed: {stderr}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// Trimmed stderr from the client.
        stderr: String,
    },

    /// The client produced output the contract does not allow.
    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput {
        /// The command line that produced the output.
        command: String,
        /// The offending output.
        output: String,
    },

    /// No name key with the requested label exists.
    #[error("name key {label:?} not found; generate it with `ipfs key gen {label}`")]
    KeyNotFound {
        /// The configured key label.
        label: String,
    },
}

/// One entry of the name-key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    /// The resolver-side identifier (peer id).
    pub id: String,
    /// The local label.
    pub name: String,
}

/// The narrow store surface the publisher depends on.
pub trait Cas: Send + Sync {
    /// Stores the file's bytes, returning their content id.
    fn put(&self, file: &Path) -> Result<String, CasError>;

    /// Points the mutable name owned by `key_label` at `/ipfs/<cid>`.
    fn name_publish(&self, key_label: &str, cid: &str) -> Result<(), CasError>;

    /// Lists the locally held name keys.
    fn key_list(&self) -> Result<Vec<KeyRef>, CasError>;

    /// Resolves a mutable-name id to the CID it currently points at, or
    /// `None` when the name does not resolve.
    fn name_resolve(&self, name_id: &str) -> Result<Option<String>, CasError>;
}

/// [`Cas`] implementation over the Kubo CLI.
#[derive(Debug, Clone)]
pub struct KuboCli {
    /// TTL passed to `ipfs name publish`, in seconds.
    pub publish_ttl_secs: u64,
    /// Whether publishes may proceed without DHT connectivity.
    pub allow_offline: bool,
    /// Timeout passed to `ipfs name resolve`, in seconds.
    pub resolve_timeout_secs: u64,
}

impl Default for KuboCli {
    fn default() -> Self {
        Self {
            publish_ttl_secs: 0,
            allow_offline: true,
            resolve_timeout_secs: 5,
        }
    }
}

impl KuboCli {
    fn run(&self, args: &[String]) -> Result<(String, String, bool), CasError> {
        let command = format!("ipfs {}", args.join(" "));
        let output = Command::new("ipfs")
            .args(args)
            .output()
            .map_err(|source| CasError::Spawn {
                command: command.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        debug!(%command, ok = output.status.success(), "ran CAS client");
        Ok((stdout, stderr, output.status.success()))
    }
}

impl Cas for KuboCli {
    fn put(&self, file: &Path) -> Result<String, CasError> {
        let args = vec![
            "add".to_string(),
            "-q".to_string(),
            file.display().to_string(),
        ];
        let (stdout, stderr, ok) = self.run(&args)?;
        let command = format!("ipfs add -q {}", file.display());
        if !ok {
            return Err(CasError::CommandFailed { command, stderr });
        }
        // `-q` prints one CID per added file; the last line is the root.
        match stdout.lines().last().map(str::trim) {
            Some(cid) if !cid.is_empty() => Ok(cid.to_string()),
            _ => Err(CasError::UnexpectedOutput {
                command,
                output: stdout,
            }),
        }
    }

    fn name_publish(&self, key_label: &str, cid: &str) -> Result<(), CasError> {
        let mut args = vec![
            "name".to_string(),
            "publish".to_string(),
            format!("--key={key_label}"),
        ];
        if self.allow_offline {
            args.push("--allow-offline".to_string());
        }
        args.push(format!("--ttl={}s", self.publish_ttl_secs));
        args.push(format!("/ipfs/{cid}"));

        let (_, stderr, ok) = self.run(&args)?;
        if ok {
            Ok(())
        } else {
            Err(CasError::CommandFailed {
                command: format!("ipfs name publish --key={key_label} /ipfs/{cid}"),
                stderr,
            })
        }
    }

    fn key_list(&self) -> Result<Vec<KeyRef>, CasError> {
        let args = vec!["key".to_string(), "list".to_string(), "-l".to_string()];
        let (stdout, stderr, ok) = self.run(&args)?;
        if !ok {
            return Err(CasError::CommandFailed {
                command: "ipfs key list -l".to_string(),
                stderr,
            });
        }
        Ok(parse_key_list(&stdout))
    }

    fn name_resolve(&self, name_id: &str) -> Result<Option<String>, CasError> {
        let args = vec![
            "name".to_string(),
            "resolve".to_string(),
            "--nocache".to_string(),
            format!("/ipns/{name_id}"),
            format!("--timeout={}s", self.resolve_timeout_secs),
        ];
        // A name that has never been published resolves with a non-zero
        // status; that is an empty chain, not an error.
        let (stdout, _, ok) = self.run(&args)?;
        if !ok {
            return Ok(None);
        }
        Ok(parse_resolved_path(&stdout))
    }
}

/// Parses `ipfs key list -l` output: one `<id> <name>` pair per line.
fn parse_key_list(stdout: &str) -> Vec<KeyRef> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let name = fields.next()?;
            Some(KeyRef {
                id: id.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Extracts the CID from a `/ipfs/<cid>` resolver path.
fn parse_resolved_path(stdout: &str) -> Option<String> {
    let trimmed = stdout.trim();
    trimmed
        .strip_prefix("/ipfs/")
        .filter(|cid| !cid.is_empty())
        .map(str::to_string)
}

/// Finds the name id for a local key label.
pub fn lookup_key_id(cas: &dyn Cas, label: &str) -> Result<String, CasError> {
    cas.key_list()?
        .into_iter()
        .find(|key| key.name == label)
        .map(|key| key.id)
        .ok_or_else(|| CasError::KeyNotFound {
            label: label.to_string(),
        })
}
