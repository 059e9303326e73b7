//! Shared test helpers for core integration tests.

#![allow(dead_code)]

use dockhand_core::command::mock::{MockResponse, MockRunner};
use dockhand_core::config::DockhandConfig;
use dockhand_core::installer::Installer;
use dockhand_core::registry::{InstallKind, SolutionDescriptor, StaticRegistry};
use dockhand_core::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Identifier of the fixture solution
pub const SOLUTION: &str = "demo";

/// Temporary workspace with a root env file location
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("workspace")).expect("workspace dir");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("workspace")
    }

    pub fn repo(&self) -> PathBuf {
        self.root().join("demo")
    }

    pub fn write_root_env(&self, content: &str) {
        fs::write(self.root().join(".env"), content).expect("root env");
    }

    pub fn config(&self) -> DockhandConfig {
        DockhandConfig {
            workspace_root: self.root(),
            network: "test-network".to_string(),
            ..DockhandConfig::default()
        }
    }
}

/// Fixture descriptor for `demo`
pub fn descriptor(kind: InstallKind) -> SolutionDescriptor {
    SolutionDescriptor {
        repo_url: "https://example.com/demo.git".to_string(),
        repo_name: "demo".to_string(),
        branch: "main".to_string(),
        image_name: "demo-img".to_string(),
        container_name: "demo-container".to_string(),
        port: 3100,
        install_type: kind,
        env_file: None,
        additional_ports: Vec::new(),
        env_defaults: IndexMap::new(),
    }
}

pub fn installer(
    workspace: &Workspace,
    runner: &MockRunner,
    descriptor: SolutionDescriptor,
) -> Installer<MockRunner, StaticRegistry> {
    let mut solutions = IndexMap::new();
    solutions.insert(SOLUTION.to_string(), descriptor);
    Installer::new(
        runner.clone(),
        StaticRegistry::new(solutions),
        workspace.config(),
    )
}

/// Runner whose `git clone` materializes `files` in the clone target and
/// whose docker commands all succeed. Filesystem probes hit the real shell.
pub fn runner_cloning(files: &[(&str, &str)]) -> MockRunner {
    let files: Vec<(String, String)> = files
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect();

    let runner = MockRunner::new();
    runner.on("docker", MockResponse::success());
    runner.on("cd ", MockResponse::success());
    runner.on_with("git clone", MockResponse::success(), move |command| {
        let target = clone_target(command);
        fs::create_dir_all(&target)?;
        for (path, content) in &files {
            write_file(&target.join(path), content)?;
        }
        Ok(())
    });
    runner
}

fn clone_target(command: &str) -> PathBuf {
    let words = shell_words::split(command).unwrap_or_default();
    PathBuf::from(words.last().cloned().unwrap_or_default())
}

pub fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}
