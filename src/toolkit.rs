//! Typed wrappers around each qpdf invocation.
//!
//! Every call spawns the resolved executable with `tokio::process`, drains
//! stdout and stderr concurrently line by line, and maps the exit status:
//!
//! | status | meaning |
//! |--------|---------|
//! | 0      | success |
//! | 3      | success with warnings (logged, output used) |
//! | other  | [`PrepError::ToolkitFailed`] |
//!
//! Exit 3 is routine here: the metadata patch edits a decomposed file in
//! place, which shifts object offsets, and qpdf reports the xref repair as a
//! warning while still writing a correct file.

use crate::config::{ModifyPermission, PreparationConfig};
use crate::error::{PrepError, PrepResult};
use crate::progress::{LogLevel, PreparationProgressCallback};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// qpdf's "succeeded with warnings" exit status.
pub const EXIT_WARNINGS: i32 = 3;

/// Forwards each output line of one invocation to the run log.
pub struct LineEcho<'a> {
    sink: &'a dyn PreparationProgressCallback,
    prefix: String,
}

impl<'a> LineEcho<'a> {
    pub fn new(sink: &'a dyn PreparationProgressCallback, prefix: impl Into<String>) -> Self {
        Self {
            sink,
            prefix: prefix.into(),
        }
    }

    fn emit(&self, channel: Channel, line: &str) {
        let level = match channel {
            Channel::Stdout => LogLevel::Info,
            Channel::Stderr => LogLevel::Warn,
        };
        self.sink.on_log(level, &format!("{} {}", self.prefix, line));
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

/// Collected output of a finished invocation.
#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

impl Captured {
    /// stderr, else stdout, else "unknown".
    fn detail(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        "unknown".to_string()
    }
}

/// Handle on the external PDF toolkit.
#[derive(Debug, Clone)]
pub struct Toolkit {
    executable: PathBuf,
}

impl Toolkit {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Use `config.toolkit_path` when set, else the process-wide resolution.
    pub fn from_config(config: &PreparationConfig) -> Self {
        match config.toolkit_path {
            Some(ref path) => Self::new(path),
            None => {
                let resolution = qpdf_locate::resolve_cached();
                info!(
                    "Using qpdf at {} ({:?})",
                    resolution.path.display(),
                    resolution.source
                );
                Self::new(resolution.path)
            }
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    // ── Invocations ──────────────────────────────────────────────────────

    /// Expand `input` into QDF form: streams uncompressed, no object streams.
    pub async fn decompose(
        &self,
        input: &Path,
        output: &Path,
        remove_metadata: bool,
    ) -> PrepResult<()> {
        let mut args: Vec<OsString> = vec![
            "--stream-data=uncompress".into(),
            "--object-streams=disable".into(),
        ];
        if remove_metadata {
            args.push("--remove-metadata".into());
        }
        args.push("--qdf".into());
        args.push(input.into());
        args.push(output.into());
        self.run_to_file(&args, output, None, None).await
    }

    /// Rewrite `input` as a normal PDF, repairing offsets.
    pub async fn rebuild(&self, input: &Path, output: &Path) -> PrepResult<()> {
        let args: Vec<OsString> = vec![input.into(), output.into()];
        self.run_to_file(&args, output, None, None).await
    }

    /// `--json` introspection of `input`.
    pub async fn inspect_json(&self, input: &Path) -> PrepResult<serde_json::Value> {
        let args: Vec<OsString> = vec!["--json".into(), input.into()];
        let captured = self.run(&args, None, None).await?;
        serde_json::from_str(&captured.stdout).map_err(|e| PrepError::InvalidIntrospection {
            path: input.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Stamp every page of `overlay` onto the matching page of `source`.
    pub async fn overlay(&self, source: &Path, overlay: &Path, output: &Path) -> PrepResult<()> {
        let args: Vec<OsString> = vec![
            "--overlay".into(),
            overlay.into(),
            "--".into(),
            source.into(),
            output.into(),
        ];
        self.run_to_file(&args, output, None, None).await
    }

    /// Recompress streams and regenerate object streams.
    pub async fn optimize(&self, input: &Path, output: &Path) -> PrepResult<()> {
        let args: Vec<OsString> = vec![
            "--stream-data=compress".into(),
            "--object-streams=generate".into(),
            "--".into(),
            input.into(),
            output.into(),
        ];
        self.run_to_file(&args, output, None, None).await
    }

    /// AES-256 encrypt with an empty user password and `owner_password`.
    /// Printing and extraction are denied; modification follows `modify`.
    pub async fn encrypt(
        &self,
        input: &Path,
        output: &Path,
        owner_password: &str,
        modify: ModifyPermission,
        echo: Option<&LineEcho<'_>>,
    ) -> PrepResult<()> {
        let args: Vec<OsString> = vec![
            "--encrypt".into(),
            "".into(),
            owner_password.into(),
            "256".into(),
            "--print=none".into(),
            "--extract=n".into(),
            format!("--modify={}", modify.as_flag()).into(),
            "--".into(),
            input.into(),
            output.into(),
        ];
        self.run_to_file(&args, output, Some(owner_password), echo)
            .await
    }

    // ── Process plumbing ─────────────────────────────────────────────────

    async fn run_to_file(
        &self,
        args: &[OsString],
        output: &Path,
        secret: Option<&str>,
        echo: Option<&LineEcho<'_>>,
    ) -> PrepResult<()> {
        self.run(args, secret, echo).await?;
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(PrepError::ToolkitOutputMissing {
                command: self.describe(args, secret),
                path: output.to_path_buf(),
            }),
        }
    }

    async fn run(
        &self,
        args: &[OsString],
        secret: Option<&str>,
        echo: Option<&LineEcho<'_>>,
    ) -> PrepResult<Captured> {
        let command = self.describe(args, secret);
        debug!("Running {}", command);

        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PrepError::ToolkitSpawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PrepError::Internal("child stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PrepError::Internal("child stderr was not captured".into()))?;

        let out_lines =
            LinesStream::new(BufReader::new(stdout).lines()).map(|l| (Channel::Stdout, l));
        let err_lines =
            LinesStream::new(BufReader::new(stderr).lines()).map(|l| (Channel::Stderr, l));
        let merged = out_lines.merge(err_lines);
        tokio::pin!(merged);

        let mut captured = Captured::default();
        while let Some((channel, line)) = merged.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("Unreadable output line from {}: {}", command, e);
                    continue;
                }
            };
            if let Some(echo) = echo {
                echo.emit(channel, &line);
            }
            let buf = match channel {
                Channel::Stdout => &mut captured.stdout,
                Channel::Stderr => &mut captured.stderr,
            };
            buf.push_str(&line);
            buf.push('\n');
        }

        let status = child.wait().await.map_err(|e| PrepError::ToolkitSpawn {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        match status.code() {
            Some(0) => Ok(captured),
            Some(EXIT_WARNINGS) => {
                warn!("{} succeeded with warnings: {}", command, captured.detail());
                Ok(captured)
            }
            Some(code) => Err(PrepError::ToolkitFailed {
                command,
                status: format!("exit code {code}"),
                detail: captured.detail(),
            }),
            None => Err(PrepError::ToolkitFailed {
                command,
                status: "terminated by signal".into(),
                detail: captured.detail(),
            }),
        }
    }

    /// Printable command line with `secret` masked.
    fn describe(&self, args: &[OsString], secret: Option<&str>) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        for arg in args {
            let arg = arg.to_string_lossy();
            if secret.is_some_and(|s| !s.is_empty() && arg == s) {
                parts.push("******".into());
            } else if arg.is_empty() {
                parts.push("''".into());
            } else {
                parts.push(arg.into_owned());
            }
        }
        parts.join(" ")
    }
}
