//! Environment file reconciliation
//!
//! A solution's repository ships a template env file whose values are mostly
//! placeholders, while the host keeps real defaults and secrets in a root env
//! file. Reconciliation merges the two so the host values fill every key the
//! repository leaves absent or empty, without ever overriding a value the
//! repository sets.
//!
//! ## File Format
//!
//! - `KEY=VALUE`, one per line; key and value are trimmed
//! - the value is everything after the first `=` (values may contain `=`)
//! - blank lines, `#` comments and lines without `=` are ignored
//!
//! ## Output modes
//!
//! - build arguments: `--build-arg KEY="VALUE"` tokens for `docker build`
//! - merged file: a `.env.temp` beside the repository's `.env`, swapped in
//!   around the compose run by [`EnvSwap`]

use crate::errors::{EnvError, Result};
use crate::registry::InstallKind;
use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Ordered set of environment variables
pub type EnvVars = IndexMap<String, String>;

/// Name of the temporary merged env file
pub const MERGED_ENV_FILE: &str = ".env.temp";

/// Suffix appended to the repository env file while it is swapped out
pub const BACKUP_SUFFIX: &str = ".backup";

/// Parse env file content.
pub fn parse_env_str(content: &str) -> EnvVars {
    let mut vars = EnvVars::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        vars.insert(key.trim().to_string(), value.trim().to_string());
    }
    vars
}

/// Parse an env file; a missing file is an empty set.
pub fn parse_env_file(path: &Path) -> io::Result<EnvVars> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_env_str(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EnvVars::new()),
        Err(e) => Err(e),
    }
}

/// Merge root defaults into the local set.
///
/// Local non-empty values always win. A root key is adopted when it is absent
/// or empty locally and its root value is non-empty. Local keys keep their
/// order; adopted root-only keys follow in root order.
pub fn merge_env(root: &EnvVars, local: &EnvVars) -> EnvVars {
    let mut merged = local.clone();
    for (key, value) in root {
        if value.is_empty() {
            continue;
        }
        let missing = merged.get(key).map_or(true, |v| v.is_empty());
        if missing {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Render `--build-arg KEY="VALUE"` tokens, space separated.
///
/// Characters the shell interprets inside double quotes are escaped.
pub fn render_build_args(vars: &EnvVars) -> String {
    // docker rejects a build argument without a name
    vars.iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| format!("--build-arg {}=\"{}\"", key, escape_double_quoted(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Render `KEY=VALUE` lines
pub fn render_env_file(vars: &EnvVars) -> String {
    vars.iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write `vars` as an env file
pub fn write_env_file(path: &Path, vars: &EnvVars) -> io::Result<()> {
    fs::write(path, render_env_file(vars))
}

/// Inject `defaults` into the env file at `path`.
///
/// Creates the file when missing; otherwise appends each default whose key is
/// absent or empty. Returns how many keys were injected.
pub fn apply_env_defaults(path: &Path, defaults: &EnvVars) -> io::Result<usize> {
    if defaults.is_empty() {
        return Ok(0);
    }

    if !path.exists() {
        write_env_file(path, defaults)?;
        return Ok(defaults.len());
    }

    let mut content = fs::read_to_string(path)?;
    let existing = parse_env_str(&content);
    let missing: Vec<(&String, &String)> = defaults
        .iter()
        .filter(|(key, _)| existing.get(*key).map_or(true, |v| v.is_empty()))
        .collect();

    if missing.is_empty() {
        return Ok(0);
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for (key, value) in &missing {
        content.push_str(&format!("{}={}\n", key, value));
    }
    fs::write(path, content)?;
    Ok(missing.len())
}

/// A merged env file waiting to be swapped in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEnvFile {
    /// Temporary merged file (equal to `env_path` when merging fell back)
    pub merged_path: PathBuf,
    /// The repository's own env file
    pub env_path: PathBuf,
    /// Where the original is kept during the swap
    pub backup_path: PathBuf,
}

impl MergedEnvFile {
    fn fallback(env_path: &Path) -> Self {
        Self {
            merged_path: env_path.to_path_buf(),
            env_path: env_path.to_path_buf(),
            backup_path: backup_path_for(env_path),
        }
    }

    /// True when merging failed and the untouched local file is used as is
    pub fn is_noop(&self) -> bool {
        self.merged_path == self.env_path
    }

    /// Delete the temporary merged file without swapping it in
    pub fn discard(&self) {
        if self.is_noop() {
            return;
        }
        if let Err(e) = remove_if_exists(&self.merged_path) {
            warn!(
                "Could not remove temporary env file {}: {}",
                self.merged_path.display(),
                e
            );
        }
    }
}

fn backup_path_for(env_path: &Path) -> PathBuf {
    let mut name = env_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| ".env".into());
    name.push(BACKUP_SUFFIX);
    env_path.with_file_name(name)
}

/// Result of environment reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentMergeResult {
    /// Single-container installs: build argument string (empty on fallback)
    BuildArgs(String),
    /// Multi-service installs: merged file to swap in around compose
    MergedFile(MergedEnvFile),
}

impl EnvironmentMergeResult {
    /// The merged file to swap in, for file-mode results
    pub fn merged_file(&self) -> Option<&MergedEnvFile> {
        match self {
            Self::BuildArgs(_) => None,
            Self::MergedFile(merged) => Some(merged),
        }
    }
}

/// Merges the host root env file into repository env files
#[derive(Debug, Clone)]
pub struct EnvReconciler {
    root_env: PathBuf,
}

impl EnvReconciler {
    pub fn new(root_env: impl Into<PathBuf>) -> Self {
        Self {
            root_env: root_env.into(),
        }
    }

    /// Reconcile in the mode matching the install kind
    pub fn reconcile(&self, kind: InstallKind, local_env: &Path) -> EnvironmentMergeResult {
        match kind {
            InstallKind::SingleContainer => {
                EnvironmentMergeResult::BuildArgs(self.build_args(local_env))
            }
            InstallKind::MultiService => {
                EnvironmentMergeResult::MergedFile(self.merged_file(local_env))
            }
        }
    }

    /// Merged variables rendered as build arguments; empty when merging fails
    #[instrument(skip(self))]
    pub fn build_args(&self, local_env: &Path) -> String {
        match self.merge(local_env) {
            Ok(vars) => {
                info!("Merged {} environment variables", vars.len());
                render_build_args(&vars)
            }
            Err(e) => {
                warn!("{}; continuing without build arguments", e);
                String::new()
            }
        }
    }

    /// Merged variables written beside `local_env`; falls back to `local_env`
    /// itself when merging fails
    #[instrument(skip(self))]
    pub fn merged_file(&self, local_env: &Path) -> MergedEnvFile {
        let merged_path = local_env.with_file_name(MERGED_ENV_FILE);
        let result = self.merge(local_env).and_then(|vars| {
            write_env_file(&merged_path, &vars).map_err(|source| EnvError::MergeFailed {
                path: merged_path.clone(),
                source,
            })?;
            Ok(vars.len())
        });

        match result {
            Ok(count) => {
                info!(
                    "Merged {} environment variables into {}",
                    count,
                    merged_path.display()
                );
                MergedEnvFile {
                    merged_path,
                    env_path: local_env.to_path_buf(),
                    backup_path: backup_path_for(local_env),
                }
            }
            Err(e) => {
                warn!("{}; continuing with existing env file", e);
                MergedEnvFile::fallback(local_env)
            }
        }
    }

    fn merge(&self, local_env: &Path) -> std::result::Result<EnvVars, EnvError> {
        let root = parse_env_file(&self.root_env).map_err(|source| EnvError::MergeFailed {
            path: self.root_env.clone(),
            source,
        })?;
        let local = parse_env_file(local_env).map_err(|source| EnvError::MergeFailed {
            path: local_env.to_path_buf(),
            source,
        })?;
        debug!(
            "Merging {} root variables into {} local variables",
            root.len(),
            local.len()
        );
        Ok(merge_env(&root, &local))
    }
}

/// Scoped swap of a merged env file over the repository's env file.
///
/// [`EnvSwap::acquire`] backs up the original and copies the merged file over
/// it. Releasing restores the original byte-for-byte (or removes the swapped
/// file when there was no original) and deletes the backup and the temporary
/// merged file. Release runs on drop, so it happens on every exit path of the
/// protected operation; call [`EnvSwap::release`] to observe restore errors.
#[derive(Debug)]
pub struct EnvSwap {
    files: MergedEnvFile,
    had_original: bool,
    released: bool,
}

impl EnvSwap {
    /// Back up the repository env file and swap the merged file in
    #[instrument(skip_all, fields(env = %files.env_path.display()))]
    pub fn acquire(files: &MergedEnvFile) -> Result<Self> {
        if files.is_noop() {
            debug!("Env merge fell back to the local file; nothing to swap");
            return Ok(Self {
                files: files.clone(),
                had_original: false,
                released: true,
            });
        }

        let had_original = files.env_path.exists();
        if had_original {
            fs::copy(&files.env_path, &files.backup_path).map_err(|source| EnvError::Swap {
                path: files.backup_path.clone(),
                source,
            })?;
            info!("Backed up {}", files.env_path.display());
        }
        let swap = Self {
            files: files.clone(),
            had_original,
            released: false,
        };

        // On failure the guard drops here and puts the original back.
        fs::copy(&files.merged_path, &files.env_path).map_err(|source| EnvError::Swap {
            path: files.env_path.clone(),
            source,
        })?;
        info!("Using merged environment variables");

        Ok(swap)
    }

    /// Restore the original env file and delete temporaries
    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let files = &self.files;
        let restored = if self.had_original {
            fs::rename(&files.backup_path, &files.env_path)
        } else {
            remove_if_exists(&files.env_path)
        };
        let cleaned = remove_if_exists(&files.merged_path);

        restored.map_err(|source| EnvError::Swap {
            path: files.env_path.clone(),
            source,
        })?;
        cleaned.map_err(|source| EnvError::Swap {
            path: files.merged_path.clone(),
            source,
        })?;
        info!("Restored original {}", files.env_path.display());
        Ok(())
    }
}

impl Drop for EnvSwap {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Could not restore environment file: {}", e);
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
