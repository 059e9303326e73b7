//! Build strategy selection
//!
//! A pure decision over a probed [`RepositoryStructure`]. Strategies are tried
//! in fixed priority: compose stack, root Dockerfile, subdirectory
//! Dockerfiles, then whole-tree discovery. Single-container solutions never
//! use the compose strategy.

use crate::registry::InstallKind;
use crate::structure::RepositoryStructure;
use std::fmt;

/// Subdirectory preferred as the container to run
pub const PREFERRED_RUN_TARGET: &str = "frontend";

/// How a repository is built and started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Bring the compose stack up
    Compose { file: String },
    /// Build the repository root and run it
    RootDockerfile,
    /// Build every listed subdirectory, run `run_target`
    Subdirectories { dirs: Vec<String>, run_target: String },
    /// Build the directory of the first Dockerfile found anywhere
    Discover,
}

impl BuildStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Compose { .. } => "compose",
            Self::RootDockerfile => "root-dockerfile",
            Self::Subdirectories { .. } => "subdirectories",
            Self::Discover => "discover",
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compose { file } => write!(f, "compose ({})", file),
            Self::Subdirectories { dirs, run_target } => {
                write!(f, "subdirectories ({}; running {})", dirs.join(", "), run_target)
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Pick the highest-priority strategy the structure supports
pub fn select_strategy(structure: &RepositoryStructure, kind: InstallKind) -> BuildStrategy {
    if kind == InstallKind::MultiService {
        if let Some(file) = structure
            .compose_file
            .as_ref()
            .filter(|_| structure.has_docker_compose)
        {
            return BuildStrategy::Compose { file: file.clone() };
        }
    }

    if structure.has_root_dockerfile {
        return BuildStrategy::RootDockerfile;
    }

    if let Some(run_target) = run_target(&structure.dockerfile_dirs) {
        return BuildStrategy::Subdirectories {
            run_target: run_target.to_string(),
            dirs: structure.dockerfile_dirs.clone(),
        };
    }

    BuildStrategy::Discover
}

/// `frontend` when present, else the first directory
pub fn run_target(dirs: &[String]) -> Option<&str> {
    dirs.iter()
        .find(|d| d.as_str() == PREFERRED_RUN_TARGET)
        .or_else(|| dirs.first())
        .map(String::as_str)
}
