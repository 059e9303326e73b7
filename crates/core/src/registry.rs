//! Solution registry
//!
//! A solution is a named third-party repository that dockhand knows how to
//! clone, configure, build and run. The registry is read-only for the life of
//! an installation; the installer only ever looks solutions up by identifier.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a solution is built and run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallKind {
    /// One image, one container
    #[serde(alias = "docker")]
    SingleContainer,
    /// A compose stack of services brought up together
    #[serde(alias = "docker-compose")]
    MultiService,
}

impl InstallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleContainer => "single-container",
            Self::MultiService => "multi-service",
        }
    }
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of an installable solution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionDescriptor {
    /// Git URL of the repository
    pub repo_url: String,
    /// Directory name of the clone under the workspace root
    pub repo_name: String,
    /// Branch to clone
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Image tag (and prefix for per-subdirectory images)
    pub image_name: String,
    /// Name of the single container started for non-compose strategies
    pub container_name: String,
    /// Published port; mapped host:container 1:1
    pub port: u16,
    /// Build/run shape
    pub install_type: InstallKind,
    /// Template environment file (relative to the repository root) seeding `.env`
    #[serde(default)]
    pub env_file: Option<String>,
    /// Extra host ports used by compose stacks, freed before `up`
    #[serde(default)]
    pub additional_ports: Vec<u16>,
    /// Minimal defaults injected into the root `.env` when keys are missing
    #[serde(default)]
    pub env_defaults: IndexMap<String, String>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Read-only lookup of solutions by identifier
pub trait SolutionRegistry {
    /// Find a solution by identifier
    fn get(&self, identifier: &str) -> Option<&SolutionDescriptor>;

    /// All known identifiers, in registry order
    fn identifiers(&self) -> Vec<String>;
}

/// Ordered in-memory registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticRegistry {
    solutions: IndexMap<String, SolutionDescriptor>,
}

impl StaticRegistry {
    pub fn new(solutions: IndexMap<String, SolutionDescriptor>) -> Self {
        Self { solutions }
    }

    /// Registry shipped with dockhand
    pub fn builtin() -> Self {
        let mut solutions = IndexMap::new();
        solutions.insert(
            "ai-doc-editor".to_string(),
            SolutionDescriptor {
                repo_url: "https://github.com/devweam-ai/ai-doc-editor.git".to_string(),
                repo_name: "ai-doc-editor".to_string(),
                branch: "main".to_string(),
                image_name: "ai-doc-editor-img".to_string(),
                container_name: "ai-doc-editor-container".to_string(),
                port: 3002,
                install_type: InstallKind::SingleContainer,
                env_file: Some("env.example".to_string()),
                additional_ports: Vec::new(),
                env_defaults: IndexMap::new(),
            },
        );

        let mut foloup_defaults = IndexMap::new();
        foloup_defaults.insert("NEXT_PUBLIC_API_BASE_PATH".to_string(), "/".to_string());
        foloup_defaults.insert("NODE_ENV".to_string(), "production".to_string());
        solutions.insert(
            "followup".to_string(),
            SolutionDescriptor {
                repo_url: "https://github.com/devweam-ai/foloup.git".to_string(),
                repo_name: "foloup".to_string(),
                branch: "main".to_string(),
                image_name: "foloup-img".to_string(),
                container_name: "foloup-container".to_string(),
                port: 4000,
                install_type: InstallKind::MultiService,
                env_file: Some(".env.example".to_string()),
                additional_ports: Vec::new(),
                env_defaults: foloup_defaults,
            },
        );

        Self { solutions }
    }

    /// Iterate over `(identifier, descriptor)` pairs in registry order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SolutionDescriptor)> {
        self.solutions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }
}

impl SolutionRegistry for StaticRegistry {
    fn get(&self, identifier: &str) -> Option<&SolutionDescriptor> {
        self.solutions.get(identifier)
    }

    fn identifiers(&self) -> Vec<String> {
        self.solutions.keys().cloned().collect()
    }
}

impl<T: SolutionRegistry> SolutionRegistry for &T {
    fn get(&self, identifier: &str) -> Option<&SolutionDescriptor> {
        (*self).get(identifier)
    }

    fn identifiers(&self) -> Vec<String> {
        (*self).identifiers()
    }
}
