//! Repository structure probing
//!
//! Classifies how a freshly cloned repository expects to be built. Every
//! probe is an existence check through the command runner; a non-zero exit
//! means "absent", never an error.

use crate::command::{CommandRunner, CommandRunnerExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Compose descriptor names, in lookup priority
pub const COMPOSE_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Single-container build descriptor
pub const BUILD_DESCRIPTOR: &str = "Dockerfile";

/// Conventional service directory names (informational)
pub const SERVICE_DIR_HINTS: &[&str] = &["frontend", "backend", "node", "python", "api", "web", "app"];

/// Build shape of a cloned repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryStructure {
    pub has_docker_compose: bool,
    /// First compose descriptor found at the root
    pub compose_file: Option<String>,
    pub has_root_dockerfile: bool,
    /// Immediate child directories containing a Dockerfile, in discovery order
    pub dockerfile_dirs: Vec<String>,
    /// Conventional service directories present at the root
    pub service_dirs: Vec<String>,
}

/// Probe `repo` in priority order
#[instrument(skip(runner))]
pub async fn probe_structure<R: CommandRunner>(runner: &R, repo: &Path) -> RepositoryStructure {
    let mut structure = RepositoryStructure::default();

    for name in COMPOSE_FILE_NAMES {
        if runner.probe(&test_file(repo, name)).await {
            structure.has_docker_compose = true;
            structure.compose_file = Some((*name).to_string());
            break;
        }
    }

    structure.has_root_dockerfile = runner.probe(&test_file(repo, BUILD_DESCRIPTOR)).await;
    structure.dockerfile_dirs = find_dockerfile_dirs(runner, repo).await;

    for hint in SERVICE_DIR_HINTS {
        let path = repo.join(hint);
        if runner
            .probe(&format!("test -d {}", quote_path(&path)))
            .await
        {
            structure.service_dirs.push((*hint).to_string());
        }
    }

    match serde_json::to_string(&structure) {
        Ok(json) => debug!("Repository structure: {}", json),
        Err(_) => debug!("Repository structure: {:?}", structure),
    }
    structure
}

async fn find_dockerfile_dirs<R: CommandRunner>(runner: &R, repo: &Path) -> Vec<String> {
    let command = format!(
        "find {} -mindepth 2 -name {} -type f -not -path '*/.git/*'",
        quote_path(repo),
        BUILD_DESCRIPTOR
    );
    let output = match runner.output(&command).await {
        Ok(output) if output.success() => output.stdout,
        Ok(output) => {
            debug!("Dockerfile search exited with code {}", output.exit_code);
            return Vec::new();
        }
        Err(e) => {
            debug!("Dockerfile search could not run: {}", e);
            return Vec::new();
        }
    };
    parse_dockerfile_dirs(repo, &output)
}

/// Directory of the first Dockerfile anywhere under `repo`
#[instrument(skip(runner))]
pub async fn find_any_dockerfile<R: CommandRunner>(runner: &R, repo: &Path) -> Option<PathBuf> {
    let command = format!(
        "find {} -name {} -type f -not -path '*/.git/*' | head -1",
        quote_path(repo),
        BUILD_DESCRIPTOR
    );
    let output = match runner.output(&command).await {
        Ok(output) => output,
        Err(e) => {
            debug!("Dockerfile search could not run: {}", e);
            return None;
        }
    };
    let first = output.stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    Path::new(first).parent().map(Path::to_path_buf)
}

/// Map `find` output lines to de-duplicated immediate child directory names
pub(crate) fn parse_dockerfile_dirs(repo: &Path, find_output: &str) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();
    for line in find_output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(relative) = Path::new(line).strip_prefix(repo) else {
            continue;
        };
        let mut components = relative.components();
        let (Some(first), Some(_)) = (components.next(), components.next()) else {
            continue;
        };
        let name = first.as_os_str().to_string_lossy().into_owned();
        if !dirs.contains(&name) {
            dirs.push(name);
        }
    }
    dirs
}

fn test_file(repo: &Path, name: &str) -> String {
    format!("test -f {}", quote_path(&repo.join(name)))
}

pub(crate) fn quote_path(path: &Path) -> String {
    shell_words::quote(&path.to_string_lossy()).into_owned()
}
