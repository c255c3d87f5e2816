//! `harlowe.toml` configuration.
//!
//! Defines the typed configuration for the document path, reference-file
//! globs, the assistant executable, and the optional global concurrency
//! cap — the construction-time inputs `ThreadManager` and `Workspace` need
//! that a host collaborator supplies; the core takes only what it needs
//! by construction.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level Harlowe configuration.
///
/// Parsed from `harlowe.toml`. Missing fields use sensible defaults.
/// Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarloweConfig {
    /// Document and reference-file settings.
    #[serde(default)]
    pub document: DocumentConfig,

    /// Assistant subprocess settings.
    #[serde(default)]
    pub assistant: AssistantSettings,

    /// Concurrency settings.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

// ---------------------------------------------------------------------------
// DocumentConfig
// ---------------------------------------------------------------------------

/// The document this session edits, and any reference material handed to
/// every invocation as read-only context.
#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentConfig {
    /// Path to the live markdown document. `None` until the host resolves
    /// it (e.g. from a CLI argument); the core never guesses a document.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Glob patterns (relative to the document's directory) identifying
    /// read-only reference files copied into every workspace.
    #[serde(default)]
    pub reference_globs: Vec<String>,

    /// Directory ephemeral per-invocation workspaces are created under.
    /// Defaults to a `.harlowe/workspaces` sibling of the document.
    #[serde(default)]
    pub workspaces_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// AssistantSettings
// ---------------------------------------------------------------------------

/// How to spawn the external assistant subprocess.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssistantSettings {
    /// Path to the assistant executable.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Per-invocation timeout override, in seconds. Defaults to the
    /// engine's 300-second ceiling when unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            timeout_seconds: None,
        }
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("claude")
}

// ---------------------------------------------------------------------------
// ConcurrencyConfig
// ---------------------------------------------------------------------------

/// Scheduling limits enforced by `ThreadManager`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Optional cap on how many threads may have a subprocess in flight at
    /// once. `None` means unbounded (at-most-one-per-thread is still
    /// enforced independently of this cap).
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a Harlowe configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl HarloweConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })
    }

    /// The effective workspaces directory for `document_path`: the
    /// configured override, or `.harlowe/workspaces` next to the document.
    #[must_use]
    pub fn workspaces_dir(&self, document_path: &Path) -> PathBuf {
        if let Some(dir) = &self.document.workspaces_dir {
            return dir.clone();
        }
        document_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".harlowe")
            .join("workspaces")
    }

    /// The effective per-invocation timeout, or `None` to use the
    /// 300-second default ceiling.
    #[must_use]
    pub const fn assistant_timeout(&self) -> Option<std::time::Duration> {
        match self.assistant.timeout_seconds {
            Some(s) => Some(std::time::Duration::from_secs(s)),
            None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = HarloweConfig::default();
        assert_eq!(cfg.document.path, None);
        assert!(cfg.document.reference_globs.is_empty());
        assert_eq!(cfg.assistant.executable, PathBuf::from("claude"));
        assert_eq!(cfg.assistant.timeout_seconds, None);
        assert_eq!(cfg.concurrency.max_in_flight, None);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = HarloweConfig::parse("").unwrap();
        assert_eq!(cfg, HarloweConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[document]
path = "notes.md"
reference_globs = ["style/*.md"]

[assistant]
executable = "/usr/local/bin/claude"
timeout_seconds = 120

[concurrency]
max_in_flight = 4
"#;
        let cfg = HarloweConfig::parse(toml).unwrap();
        assert_eq!(cfg.document.path, Some(PathBuf::from("notes.md")));
        assert_eq!(cfg.document.reference_globs, vec!["style/*.md".to_owned()]);
        assert_eq!(cfg.assistant.executable, PathBuf::from("/usr/local/bin/claude"));
        assert_eq!(cfg.assistant.timeout_seconds, Some(120));
        assert_eq!(cfg.concurrency.max_in_flight, Some(4));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let toml = "[document]\nbogus = true\n";
        assert!(HarloweConfig::parse(toml).is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = HarloweConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg, HarloweConfig::default());
    }

    #[test]
    fn workspaces_dir_defaults_next_to_document() {
        let cfg = HarloweConfig::default();
        let dir = cfg.workspaces_dir(Path::new("/tmp/doc/notes.md"));
        assert_eq!(dir, PathBuf::from("/tmp/doc/.harlowe/workspaces"));
    }

    #[test]
    fn assistant_timeout_converts_seconds() {
        let mut cfg = HarloweConfig::default();
        cfg.assistant.timeout_seconds = Some(45);
        assert_eq!(cfg.assistant_timeout(), Some(std::time::Duration::from_secs(45)));
    }
}
