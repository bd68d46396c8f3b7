//! # qpdf-locate
//!
//! Find the [qpdf](https://qpdf.readthedocs.io/) executable that
//! `pdf-dispatch` drives as a subprocess.
//!
//! ## Resolution order
//!
//! 1. `PDFDISPATCH_QPDF` — explicit path override (used when the file exists).
//! 2. The OS `PATH`. On Windows every entry is probed with the `PATHEXT`
//!    extension list.
//! 3. A bundled per-platform binary below one of the resource roots:
//!    `<root>/qpdf/<platform>/bin/qpdf` or `<root>/qpdf/<platform>/qpdf`.
//!    Paths inside a packed application archive (`app.asar`) are also tried
//!    in their unpacked form (`app.asar.unpacked`).
//! 4. The bare command name `qpdf`.
//!
//! Resolution never fails. A missing toolkit only surfaces when the caller
//! spawns the returned path.
//!
//! ```rust,no_run
//! let resolution = qpdf_locate::resolve_cached();
//! println!("using {} ({:?})", resolution.path.display(), resolution.source);
//! ```
//!
//! ## Platform support
//!
//! | OS      | Arch    | Bundle directory |
//! |---------|---------|------------------|
//! | macOS   | arm64   | `darwin-arm64`   |
//! | macOS   | x86_64  | `darwin-x64`     |
//! | Linux   | x86_64  | `linux-x64`      |
//! | Linux   | aarch64 | `linux-arm64`    |
//! | Windows | x86_64  | `win32-x64`      |
//! | Windows | aarch64 | `win32-arm64`    |
//! | Windows | x86     | `win32-ia32`     |

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Command name used for the `PATH` search and as the last-resort fallback.
pub const COMMAND_NAME: &str = "qpdf";

/// Environment variable holding an explicit path to the executable.
pub const ENV_OVERRIDE: &str = "PDFDISPATCH_QPDF";

/// Environment variable naming an extra resource root for bundled binaries.
pub const ENV_RESOURCES: &str = "PDFDISPATCH_RESOURCES";

/// Used when `PATHEXT` is unset on Windows.
const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by [`probe_version`].
#[derive(Error, Debug)]
pub enum LocateError {
    /// The executable could not be started at all.
    #[error("Failed to run '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executable ran but reported failure.
    #[error("'{path}' exited with {status}: {detail}")]
    Failed {
        path: PathBuf,
        status: String,
        detail: String,
    },
}

// ── Resolution result ────────────────────────────────────────────────────────

/// Which step of the resolution order produced the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    EnvOverride,
    SystemPath,
    Bundled,
    BareName,
}

/// A resolved executable path and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub source: ResolutionSource,
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Directory below `<root>/qpdf/`, e.g. `linux-x64`.
    bundle_dir: &'static str,
    /// Executable filename inside the bundle.
    exe_name: &'static str,
}

fn detect_platform() -> Option<PlatformInfo> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    let bundle_dir = match (os, arch) {
        ("macos", "aarch64") => "darwin-arm64",
        ("macos", "x86_64") => "darwin-x64",
        ("linux", "x86_64") => "linux-x64",
        ("linux", "aarch64") => "linux-arm64",
        ("windows", "x86_64") => "win32-x64",
        ("windows", "aarch64") => "win32-arm64",
        ("windows", "x86") => "win32-ia32",
        _ => return None,
    };
    let exe_name = if os == "windows" { "qpdf.exe" } else { "qpdf" };

    Some(PlatformInfo {
        bundle_dir,
        exe_name,
    })
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Resolves the toolkit executable from an explicit snapshot of the
/// environment.
///
/// [`CommandResolver::from_env`] captures the real process environment;
/// [`CommandResolver::new`] starts empty so tests can inject every input.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    command: String,
    env_override: Option<OsString>,
    path_var: Option<OsString>,
    path_ext: Option<OsString>,
    resource_roots: Vec<PathBuf>,
    windows: bool,
}

impl CommandResolver {
    /// A resolver with no environment: only explicitly supplied inputs count.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env_override: None,
            path_var: None,
            path_ext: None,
            resource_roots: Vec::new(),
            windows: cfg!(windows),
        }
    }

    /// A resolver for [`COMMAND_NAME`] reading `PDFDISPATCH_QPDF`, `PATH`,
    /// `PATHEXT` and the default resource roots.
    pub fn from_env() -> Self {
        let mut resolver = Self::new(COMMAND_NAME);
        resolver.env_override = std::env::var_os(ENV_OVERRIDE).filter(|v| !v.is_empty());
        resolver.path_var = std::env::var_os("PATH");
        resolver.path_ext = std::env::var_os("PATHEXT");
        resolver.resource_roots = default_resource_roots();
        resolver
    }

    pub fn env_override(mut self, value: impl Into<OsString>) -> Self {
        self.env_override = Some(value.into());
        self
    }

    pub fn path_var(mut self, value: impl Into<OsString>) -> Self {
        self.path_var = Some(value.into());
        self
    }

    pub fn path_ext(mut self, value: impl Into<OsString>) -> Self {
        self.path_ext = Some(value.into());
        self
    }

    pub fn resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_roots.push(root.into());
        self
    }

    /// Treat the environment as Windows (`PATHEXT` probing, `.exe` bundles).
    pub fn windows(mut self, windows: bool) -> Self {
        self.windows = windows;
        self
    }

    /// Run the resolution order. Never fails.
    pub fn resolve(&self) -> Resolution {
        if let Some(ref value) = self.env_override {
            let p = PathBuf::from(value);
            if p.is_file() {
                return Resolution {
                    path: p,
                    source: ResolutionSource::EnvOverride,
                };
            }
            // Fall through: override set but file missing.
            eprintln!(
                "qpdf-locate: {ENV_OVERRIDE} '{}' not found; searching PATH …",
                p.display()
            );
        }

        if let Some(path) = self.search_path() {
            return Resolution {
                path,
                source: ResolutionSource::SystemPath,
            };
        }

        if let Some(path) = self.search_bundled() {
            return Resolution {
                path,
                source: ResolutionSource::Bundled,
            };
        }

        Resolution {
            path: PathBuf::from(&self.command),
            source: ResolutionSource::BareName,
        }
    }

    fn search_path(&self) -> Option<PathBuf> {
        let path_var = self.path_var.as_ref()?;
        let names = self.candidate_names();

        std::env::split_paths(path_var)
            .filter(|dir| !dir.as_os_str().is_empty())
            .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
            .find(|candidate| is_executable(candidate))
    }

    fn search_bundled(&self) -> Option<PathBuf> {
        let platform = detect_platform()?;
        let exe_name = if self.windows && !platform.exe_name.ends_with(".exe") {
            format!("{}.exe", platform.exe_name)
        } else {
            platform.exe_name.to_string()
        };

        self.resource_roots
            .iter()
            .flat_map(|root| bundled_candidates(root, platform.bundle_dir, &exe_name))
            .find(|candidate| is_executable(candidate))
    }

    /// File names probed in each `PATH` entry.
    fn candidate_names(&self) -> Vec<String> {
        if !self.windows {
            return vec![self.command.clone()];
        }

        let exts = self
            .path_ext
            .as_deref()
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PATHEXT.to_string());
        let exts: Vec<&str> = exts.split(';').filter(|e| !e.is_empty()).collect();

        let lower = self.command.to_ascii_lowercase();
        let mut names = Vec::with_capacity(exts.len() + 1);
        if exts.iter().any(|e| lower.ends_with(&e.to_ascii_lowercase())) {
            names.push(self.command.clone());
        }
        names.extend(exts.iter().map(|e| format!("{}{}", self.command, e)));
        names
    }
}

/// Roots searched for bundled binaries when resolving from the environment.
///
/// In order: `$PDFDISPATCH_RESOURCES`, `<exe dir>/resources`, `<exe dir>`,
/// and `<data-local-dir>/pdf-dispatch/resources`.
pub fn default_resource_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Some(dir) = std::env::var_os(ENV_RESOURCES).filter(|v| !v.is_empty()) {
        roots.push(PathBuf::from(dir));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir.join("resources"));
        roots.push(exe_dir);
    }

    if let Some(data) = dirs::data_local_dir() {
        roots.push(data.join("pdf-dispatch").join("resources"));
    }

    roots
}

/// Bundled-binary candidates below `root`, each followed by its unpacked
/// variant when the path crosses a packed archive.
pub fn bundled_candidates(root: &Path, bundle_dir: &str, exe_name: &str) -> Vec<PathBuf> {
    let base = root.join("qpdf").join(bundle_dir);
    let mut out = Vec::with_capacity(4);

    for candidate in [base.join("bin").join(exe_name), base.join(exe_name)] {
        let unpacked = unpacked_variant(&candidate);
        out.push(candidate);
        if let Some(u) = unpacked {
            out.push(u);
        }
    }

    out
}

/// Rewrite every `*.asar` path component to `*.asar.unpacked`.
///
/// Returns `None` when the path crosses no packed archive.
pub fn unpacked_variant(path: &Path) -> Option<PathBuf> {
    let mut changed = false;
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(name) if has_asar_suffix(name) => {
                let mut unpacked = name.to_os_string();
                unpacked.push(".unpacked");
                out.push(unpacked);
                changed = true;
            }
            other => out.push(other.as_os_str()),
        }
    }

    changed.then_some(out)
}

fn has_asar_suffix(name: &OsStr) -> bool {
    name.to_string_lossy().to_ascii_lowercase().ends_with(".asar")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Process-wide cache ───────────────────────────────────────────────────────

static RESOLVED: OnceLock<Resolution> = OnceLock::new();

/// Resolve once per process from the real environment.
pub fn resolve_cached() -> Resolution {
    RESOLVED
        .get_or_init(|| CommandResolver::from_env().resolve())
        .clone()
}

/// Run `<path> --version` and return the first line of its output.
pub fn probe_version(path: &Path) -> Result<String, LocateError> {
    let output = Command::new(path)
        .arg("--version")
        .output()
        .map_err(|source| LocateError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(LocateError::Failed {
            path: path.to_path_buf(),
            status: output.status.to_string(),
            detail,
        });
    }

    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
