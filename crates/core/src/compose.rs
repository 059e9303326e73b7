//! Docker Compose availability
//!
//! Multi-service solutions are brought up with a compose tool. The resolver
//! finds a usable invocation form (standalone `docker-compose` or the
//! `docker compose` plugin) and, when neither answers, installs a pinned
//! standalone release. Installation failures are logged and never abort an
//! installation; the compose step itself fails later if the tool is truly
//! missing.

use crate::command::{CommandRunner, CommandRunnerExt};
use crate::config::ComposeSettings;
use crate::errors::ComposeError;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Standalone compose binary name
const STANDALONE: &str = "docker-compose";

/// Invocation forms tried in order
pub const COMPOSE_CANDIDATES: &[&str] = &[STANDALONE, "docker compose"];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolved compose invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeAvailability {
    /// Command prefix used for `up`/`down`
    pub command: String,
    /// No candidate answered its version probe
    pub needs_install: bool,
}

/// Compose commands run from the repository directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    compose: String,
    project_dir: String,
}

impl ComposeCommand {
    pub fn new(availability: &ComposeAvailability, project_dir: &Path) -> Self {
        Self {
            compose: availability.command.clone(),
            project_dir: shell_words::quote(&project_dir.to_string_lossy()).into_owned(),
        }
    }

    fn in_project(&self, args: &str) -> String {
        format!("cd {} && {} {}", self.project_dir, self.compose, args)
    }

    /// Stop a previously started stack
    pub fn down(&self) -> String {
        self.in_project("down")
    }

    /// Build and start the stack detached
    pub fn up(&self) -> String {
        self.in_project("up -d --build")
    }
}

/// Finds or installs a compose tool
#[derive(Debug)]
pub struct ComposeResolver<'a, R> {
    runner: &'a R,
    settings: &'a ComposeSettings,
}

impl<'a, R: CommandRunner> ComposeResolver<'a, R> {
    pub fn new(runner: &'a R, settings: &'a ComposeSettings) -> Self {
        Self { runner, settings }
    }

    fn installed_command(&self) -> String {
        shell_words::quote(&self.settings.binary_path.to_string_lossy()).into_owned()
    }

    /// Probe the candidates' version commands
    #[instrument(skip(self))]
    pub async fn detect(&self) -> ComposeAvailability {
        for candidate in COMPOSE_CANDIDATES {
            if self.runner.probe(&format!("{} version", candidate)).await {
                info!("Using compose command: {}", candidate);
                return ComposeAvailability {
                    command: (*candidate).to_string(),
                    needs_install: false,
                };
            }
            debug!("Compose candidate not available: {}", candidate);
        }

        info!("No compose command found; it will be installed");
        ComposeAvailability {
            command: self.installed_command(),
            needs_install: true,
        }
    }

    /// Install the pinned standalone release unless a binary already exists.
    ///
    /// Returns the command prefix to use: `docker-compose` when one is on
    /// `PATH`, otherwise the configured binary path.
    #[instrument(skip(self), fields(version = %self.settings.version))]
    pub async fn install(&self) -> Result<String, ComposeError> {
        if self.runner.probe("which docker-compose").await {
            info!("docker-compose found on PATH; skipping download");
            return Ok(STANDALONE.to_string());
        }

        let binary = self.installed_command();
        if self.runner.probe(&format!("test -x {}", binary)).await {
            info!("{} already present; skipping download", binary);
            return Ok(binary);
        }

        let url = download_url(&self.settings.download_base, &self.settings.version)?;
        info!("Downloading docker compose from {}", url);
        download_binary(&url, &self.settings.binary_path).await?;

        if self.runner.probe(&format!("{} version", binary)).await {
            info!("Installed docker compose at {}", self.settings.binary_path.display());
            Ok(binary)
        } else {
            Err(ComposeError::InstallFailed {
                message: format!(
                    "{} does not run after installation",
                    self.settings.binary_path.display()
                ),
            })
        }
    }

    /// Detect, installing when needed; installation failure is only logged
    pub async fn resolve(&self) -> ComposeAvailability {
        let mut availability = self.detect().await;
        if availability.needs_install {
            match self.install().await {
                Ok(command) => availability.command = command,
                Err(e) => warn!("{}; continuing, compose commands may fail", e),
            }
        }
        availability
    }
}

/// Release asset URL for the host platform
pub fn download_url(base: &str, version: &str) -> Result<String, ComposeError> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        other => {
            return Err(ComposeError::InstallFailed {
                message: format!("unsupported operating system: {}", other),
            })
        }
    };
    let arch = match std::env::consts::ARCH {
        arch @ ("x86_64" | "aarch64" | "armv7" | "ppc64le" | "s390x" | "riscv64") => arch,
        other => {
            return Err(ComposeError::InstallFailed {
                message: format!("unsupported architecture: {}", other),
            })
        }
    };
    Ok(format!(
        "{}/{}/docker-compose-{}-{}",
        base.trim_end_matches('/'),
        version,
        os,
        arch
    ))
}

async fn download_binary(url: &str, target: &Path) -> Result<(), ComposeError> {
    let failed = |message: String| ComposeError::InstallFailed { message };

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let bytes = client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| failed(format!("download of {} failed: {}", url, e)))?
        .bytes()
        .await
        .map_err(|e| failed(format!("download of {} failed: {}", url, e)))?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("{}: {}", parent.display(), e)))?;
    }
    tokio::fs::write(target, &bytes)
        .await
        .map_err(|e| failed(format!("{}: {}", target.display(), e)))?;
    make_executable(target).await.map_err(|e| failed(format!("{}: {}", target.display(), e)))?;

    debug!("Wrote {} bytes to {}", bytes.len(), target.display());
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::{MockResponse, MockRunner};
    use std::path::PathBuf;

    fn settings(binary: &str) -> ComposeSettings {
        ComposeSettings {
            binary_path: PathBuf::from(binary),
            // Nothing listens on port 9; downloads fail fast.
            download_base: "http://127.0.0.1:9/releases".to_string(),
            ..ComposeSettings::default()
        }
    }

    #[tokio::test]
    async fn test_detect_prefers_standalone() {
        let runner = MockRunner::without_passthrough();
        let settings = settings("/usr/local/bin/docker-compose");
        let availability = ComposeResolver::new(&runner, &settings).detect().await;
        assert_eq!(availability.command, "docker-compose");
        assert!(!availability.needs_install);
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_plugin() {
        let runner = MockRunner::without_passthrough();
        runner.on("docker-compose version", MockResponse::failure(127));
        let settings = settings("/usr/local/bin/docker-compose");
        let availability = ComposeResolver::new(&runner, &settings).detect().await;
        assert_eq!(availability.command, "docker compose");
    }

    #[tokio::test]
    async fn test_standalone_on_path_is_used_without_download() {
        let runner = MockRunner::without_passthrough();
        runner.on("docker-compose version", MockResponse::failure(127));
        runner.on("docker compose version", MockResponse::failure(1));
        runner.on(
            "which docker-compose",
            MockResponse::success().with_stdout("/usr/bin/docker-compose\n"),
        );
        let settings = settings("/opt/bin/docker-compose");
        let resolver = ComposeResolver::new(&runner, &settings);

        let availability = resolver.resolve().await;
        assert!(availability.needs_install);
        assert_eq!(availability.command, "docker-compose");
        assert!(runner.commands_starting_with("test -x").is_empty());
        assert!(runner.commands_starting_with("/opt/bin/docker-compose version").is_empty());
    }

    #[tokio::test]
    async fn test_existing_binary_path_is_used_without_download() {
        let runner = MockRunner::without_passthrough();
        runner.on("docker-compose version", MockResponse::failure(127));
        runner.on("docker compose version", MockResponse::failure(1));
        runner.on("which docker-compose", MockResponse::failure(1));
        let settings = settings("/opt/bin/docker-compose");

        let availability = ComposeResolver::new(&runner, &settings).resolve().await;
        assert_eq!(availability.command, "/opt/bin/docker-compose");
        assert_eq!(runner.commands_starting_with("test -x /opt/bin/docker-compose").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_install_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = dir.path().join("docker-compose");
        let runner = MockRunner::without_passthrough();
        runner.on("docker-compose version", MockResponse::failure(127));
        runner.on("docker compose version", MockResponse::failure(1));
        runner.on("which docker-compose", MockResponse::failure(1));
        runner.on("test -x", MockResponse::failure(1));
        let settings = settings(&binary.to_string_lossy());
        let resolver = ComposeResolver::new(&runner, &settings);

        assert!(matches!(
            resolver.install().await,
            Err(ComposeError::InstallFailed { .. })
        ));
        let availability = resolver.resolve().await;
        assert!(availability.needs_install);
        assert_eq!(availability.command, shell_words::quote(&binary.to_string_lossy()));
        assert!(!binary.exists());
    }

    #[tokio::test]
    async fn test_install_downloads_pinned_release() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let base = format!("{}/releases", server.uri());
        let Ok(url) = download_url(&base, "v2.20.2") else {
            return;
        };
        let asset_path = url.trim_start_matches(&server.uri()).to_string();
        Mock::given(method("GET"))
            .and(path(asset_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\necho v2\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let binary = dir.path().join("bin").join("docker-compose");
        let runner = MockRunner::without_passthrough();
        runner.on("which docker-compose", MockResponse::failure(1));
        runner.on("test -x", MockResponse::failure(1));
        let settings = ComposeSettings {
            binary_path: binary.clone(),
            version: "v2.20.2".to_string(),
            download_base: base,
        };

        let command = ComposeResolver::new(&runner, &settings).install().await.unwrap();
        assert_eq!(command, shell_words::quote(&binary.to_string_lossy()));
        assert_eq!(std::fs::read(&binary).unwrap(), b"#!/bin/sh\necho v2\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_compose_commands_run_in_project_dir() {
        let availability = ComposeAvailability {
            command: "docker compose".to_string(),
            needs_install: false,
        };
        let compose = ComposeCommand::new(&availability, Path::new("/workspace/foloup"));
        assert_eq!(compose.down(), "cd /workspace/foloup && docker compose down");
        assert_eq!(compose.up(), "cd /workspace/foloup && docker compose up -d --build");
    }

    #[test]
    fn test_download_url_shape() {
        let url = download_url("https://example.com/download/", "v2.20.2").unwrap();
        assert!(url.starts_with("https://example.com/download/v2.20.2/docker-compose-"));
    }
}
