//! Installation orchestration
//!
//! [`Installer::install`] drives one solution through a strictly sequential
//! pipeline:
//!
//! ```text
//! cleaning -> cloning -> env-setup -> structure-detection
//!          -> [compose-resolution] -> building -> done | failed
//! ```
//!
//! Every fatal error is wrapped in [`DockhandError::InstallationFailed`]
//! naming the stage it happened in. Best-effort commands (stopping an old
//! stack, freeing ports, removing an old container) never fail the pipeline.
//! At most one installation per solution identifier runs at a time.

use crate::command::{CommandRunner, CommandRunnerExt};
use crate::compose::{ComposeAvailability, ComposeCommand, ComposeResolver};
use crate::config::DockhandConfig;
use crate::docker::{self, RunSpec};
use crate::env_file::{apply_env_defaults, EnvReconciler, EnvSwap, EnvironmentMergeResult};
use crate::errors::{DockhandError, Result};
use crate::registry::{InstallKind, SolutionDescriptor, SolutionRegistry};
use crate::strategy::{select_strategy, BuildStrategy};
use crate::structure::{find_any_dockerfile, probe_structure, quote_path};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

/// Template every multi-service repository may carry per service directory
const ENV_EXAMPLE: &str = ".env.example";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cleaning,
    Cloning,
    EnvSetup,
    StructureDetection,
    ComposeResolution,
    Building,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cleaning => "cleaning",
            Self::Cloning => "cloning",
            Self::EnvSetup => "env-setup",
            Self::StructureDetection => "structure-detection",
            Self::ComposeResolution => "compose-resolution",
            Self::Building => "building",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationOutcome {
    pub success: bool,
    /// Port the service is published on
    pub port: u16,
    /// Solution identifier
    pub solution: String,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Marks a solution identifier as being installed until dropped
struct InFlightGuard {
    in_flight: InFlight,
    identifier: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, identifier: &str) -> Result<Self> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(identifier.to_string()) {
            return Err(DockhandError::InstallationInProgress {
                identifier: identifier.to_string(),
            });
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            identifier: identifier.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identifier);
    }
}

/// Installs solutions from a registry
#[derive(Debug)]
pub struct Installer<R, G> {
    runner: R,
    registry: G,
    config: DockhandConfig,
    in_flight: InFlight,
}

impl<R: CommandRunner, G: SolutionRegistry> Installer<R, G> {
    pub fn new(runner: R, registry: G, config: DockhandConfig) -> Self {
        Self {
            runner,
            registry,
            config,
            in_flight: InFlight::default(),
        }
    }

    /// Install `identifier` from scratch.
    ///
    /// Unknown identifiers fail before anything on disk is touched.
    #[instrument(name = "install", skip_all, fields(solution = %identifier))]
    pub async fn install(&self, identifier: &str) -> Result<InstallationOutcome> {
        let descriptor =
            self.registry
                .get(identifier)
                .ok_or_else(|| DockhandError::UnknownSolution {
                    identifier: identifier.to_string(),
                    available: self.registry.identifiers(),
                })?;
        let _guard = InFlightGuard::acquire(&self.in_flight, identifier)?;

        info!(
            "Installing {} ({}) from {}",
            identifier, descriptor.install_type, descriptor.repo_url
        );
        let pipeline = Pipeline {
            runner: &self.runner,
            config: &self.config,
            solution: identifier,
            descriptor,
            repo: self.config.repo_path(descriptor),
        };

        match pipeline.run().await {
            Ok(()) => {
                info!(
                    "Installed {}; service listening on port {}",
                    identifier, descriptor.port
                );
                Ok(InstallationOutcome {
                    success: true,
                    port: descriptor.port,
                    solution: identifier.to_string(),
                })
            }
            Err(e) => {
                error!("{}", e);
                Err(e)
            }
        }
    }
}

/// Environment prepared for the build step
#[derive(Debug)]
struct EnvPlan {
    build_args: String,
    merge: EnvironmentMergeResult,
}

struct Pipeline<'a, R> {
    runner: &'a R,
    config: &'a DockhandConfig,
    solution: &'a str,
    descriptor: &'a SolutionDescriptor,
    repo: PathBuf,
}

impl<R: CommandRunner> Pipeline<'_, R> {
    async fn run(&self) -> Result<()> {
        enter(Stage::Cleaning);
        self.clean().await.map_err(self.failed(Stage::Cleaning))?;

        enter(Stage::Cloning);
        self.clone_repository()
            .await
            .map_err(self.failed(Stage::Cloning))?;

        enter(Stage::EnvSetup);
        let env = self.prepare_env().await.map_err(self.failed(Stage::EnvSetup))?;

        enter(Stage::StructureDetection);
        let structure = probe_structure(self.runner, &self.repo).await;

        let kind = self.descriptor.install_type;
        let compose = match kind {
            InstallKind::MultiService => {
                enter(Stage::ComposeResolution);
                Some(self.resolve_compose().await)
            }
            InstallKind::SingleContainer => None,
        };

        enter(Stage::Building);
        let strategy = select_strategy(&structure, kind);
        info!("Using build strategy: {}", strategy);
        let result = self.build_and_run(&strategy, &env, compose.as_ref()).await;
        if let Some(merged) = env.merge.merged_file() {
            merged.discard();
        }
        result.map_err(self.failed(Stage::Building))
    }

    fn failed(&self, stage: Stage) -> impl FnOnce(DockhandError) -> DockhandError + '_ {
        move |source| DockhandError::InstallationFailed {
            solution: self.solution.to_string(),
            stage: stage.as_str(),
            command: source.command().map(str::to_string),
            source: Box::new(source),
        }
    }

    async fn clean(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.repo).await {
            Ok(()) => debug!("Removed previous workspace {}", self.repo.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DockhandError::io(&self.repo, e)),
        }
        let root = &self.config.workspace_root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| DockhandError::io(root, e))
    }

    async fn clone_repository(&self) -> Result<()> {
        let command = format!(
            "git clone -b {} {} {}",
            shell_words::quote(&self.descriptor.branch),
            shell_words::quote(&self.descriptor.repo_url),
            quote_path(&self.repo)
        );
        self.runner.run_with_progress(&command, "git clone").await
    }

    async fn prepare_env(&self) -> Result<EnvPlan> {
        let env_path = self.repo.join(".env");
        let kind = self.descriptor.install_type;

        match kind {
            InstallKind::SingleContainer => {
                if let Some(template) = &self.descriptor.env_file {
                    let source = self.repo.join(template);
                    tokio::fs::copy(&source, &env_path)
                        .await
                        .map_err(|e| DockhandError::io(&source, e))?;
                    debug!("Seeded {} from {}", env_path.display(), template);
                }
            }
            InstallKind::MultiService => {
                self.seed_env_files().await?;

                let injected = apply_env_defaults(&env_path, &self.descriptor.env_defaults)
                    .map_err(|e| DockhandError::io(&env_path, e))?;
                if injected > 0 {
                    info!("Injected {} default environment variables", injected);
                }
            }
        }

        let reconciler = EnvReconciler::new(self.config.root_env_path());
        let merge = reconciler.reconcile(kind, &env_path);
        let build_args = match &merge {
            EnvironmentMergeResult::BuildArgs(args) => args.clone(),
            // Fallback strategies build images from the same merged variables.
            EnvironmentMergeResult::MergedFile(_) => reconciler.build_args(&env_path),
        };
        Ok(EnvPlan { build_args, merge })
    }

    /// Copy every env template in the tree to a sibling `.env`
    async fn seed_env_files(&self) -> Result<()> {
        let mut templates = vec![ENV_EXAMPLE.to_string()];
        let extra = self
            .descriptor
            .env_file
            .as_deref()
            .and_then(|t| Path::new(t).file_name())
            .map(|n| n.to_string_lossy().into_owned());
        if let Some(name) = extra.filter(|n| n != ENV_EXAMPLE && n != ".env") {
            templates.push(name);
        }

        for template in &templates {
            let command = format!(
                "find {} -name {} -not -path '*/.git/*' -exec sh -c 'cp \"$1\" \"$(dirname \"$1\")/.env\"' _ {{}} \\;",
                quote_path(&self.repo),
                shell_words::quote(template)
            );
            self.runner.run_with_progress(&command, "env files").await?;
        }
        Ok(())
    }

    async fn resolve_compose(&self) -> ComposeAvailability {
        ComposeResolver::new(self.runner, &self.config.compose)
            .resolve()
            .await
    }

    async fn build_and_run(
        &self,
        strategy: &BuildStrategy,
        env: &EnvPlan,
        compose: Option<&ComposeAvailability>,
    ) -> Result<()> {
        let image = &self.descriptor.image_name;
        match strategy {
            BuildStrategy::Compose { file } => {
                let availability = match compose {
                    Some(availability) => availability.clone(),
                    None => self.resolve_compose().await,
                };
                info!("Using compose file {}", file);
                self.run_compose(&availability, env).await
            }
            BuildStrategy::RootDockerfile => {
                self.build(image, &env.build_args, &self.repo).await?;
                self.start(image).await
            }
            BuildStrategy::Subdirectories { dirs, run_target } => {
                for dir in dirs {
                    let tag = docker::subdirectory_image(image, dir);
                    self.build(&tag, &env.build_args, &self.repo.join(dir))
                        .await?;
                }
                self.start(&docker::subdirectory_image(image, run_target))
                    .await
            }
            BuildStrategy::Discover => {
                let context = find_any_dockerfile(self.runner, &self.repo)
                    .await
                    .ok_or_else(|| DockhandError::NoBuildDescriptorFound {
                        repository: self.descriptor.repo_url.clone(),
                    })?;
                info!("Found Dockerfile in {}", context.display());
                self.build(image, &env.build_args, &context).await?;
                self.start(image).await
            }
        }
    }

    async fn run_compose(&self, availability: &ComposeAvailability, env: &EnvPlan) -> Result<()> {
        let compose = ComposeCommand::new(availability, &self.repo);
        self.runner
            .run_tolerant(&compose.down(), "compose down")
            .await;
        for port in &self.descriptor.additional_ports {
            self.runner
                .run_tolerant(&docker::stop_port_publishers(*port), &format!("free port {}", port))
                .await;
        }

        let swap = env.merge.merged_file().map(EnvSwap::acquire).transpose()?;
        let result = self
            .runner
            .run_with_progress(&compose.up(), "compose up")
            .await;
        if let Some(swap) = swap {
            if let Err(e) = swap.release() {
                warn!("{}", e);
            }
        }
        result
    }

    async fn build(&self, tag: &str, build_args: &str, context: &Path) -> Result<()> {
        let command = docker::build_image(tag, build_args, context);
        self.runner
            .run_with_progress(&command, &format!("build {}", tag))
            .await
    }

    async fn start(&self, image: &str) -> Result<()> {
        let container = &self.descriptor.container_name;
        if self
            .runner
            .run_tolerant(&docker::remove_container(container), "docker rm")
            .await
            .succeeded()
        {
            debug!("Removed existing container {}", container);
        }
        let run = RunSpec {
            container,
            image,
            network: &self.config.network,
            port: self.descriptor.port,
        };
        self.runner
            .run_with_progress(&run.command(), "docker run")
            .await
    }
}

fn enter(stage: Stage) {
    info!(stage = stage.as_str(), "Entering stage {}", stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::{MockResponse, MockRunner};
    use crate::registry::StaticRegistry;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn descriptor(kind: InstallKind) -> SolutionDescriptor {
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

    fn installer(
        dir: &TempDir,
        runner: &MockRunner,
        kind: InstallKind,
    ) -> Installer<MockRunner, StaticRegistry> {
        let mut solutions = IndexMap::new();
        solutions.insert("demo".to_string(), descriptor(kind));
        let config = DockhandConfig {
            workspace_root: dir.path().join("workspace"),
            ..DockhandConfig::default()
        };
        Installer::new(runner.clone(), StaticRegistry::new(solutions), config)
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::EnvSetup.as_str(), "env-setup");
        assert_eq!(Stage::StructureDetection.to_string(), "structure-detection");
    }

    #[tokio::test]
    async fn test_unknown_solution_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::without_passthrough();
        let installer = installer(&dir, &runner, InstallKind::SingleContainer);

        let err = installer.install("missing").await.unwrap_err();
        assert!(matches!(err, DockhandError::UnknownSolution { .. }));
        assert!(runner.history().is_empty());
        assert!(!dir.path().join("workspace").exists());
    }

    #[tokio::test]
    async fn test_clone_failure_is_attributed_to_cloning() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::without_passthrough();
        runner.on(
            "git clone",
            MockResponse::failure(128).with_stderr("fatal: repository not found"),
        );
        let installer = installer(&dir, &runner, InstallKind::SingleContainer);

        match installer.install("demo").await.unwrap_err() {
            DockhandError::InstallationFailed { stage, command, .. } => {
                assert_eq!(stage, "cloning");
                assert!(command.unwrap().starts_with("git clone -b main"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.commands_starting_with("docker").is_empty());
    }

    #[tokio::test]
    async fn test_install_in_progress_is_rejected_until_released() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::without_passthrough();
        runner.on("git clone", MockResponse::failure(1));
        let installer = installer(&dir, &runner, InstallKind::SingleContainer);

        let guard = InFlightGuard::acquire(&installer.in_flight, "demo").unwrap();
        let err = installer.install("demo").await.unwrap_err();
        assert!(matches!(err, DockhandError::InstallationInProgress { .. }));
        assert!(runner.history().is_empty());

        drop(guard);
        let err = installer.install("demo").await.unwrap_err();
        assert!(matches!(err, DockhandError::InstallationFailed { stage: "cloning", .. }));

        // A failed attempt releases the lock as well.
        let err = installer.install("demo").await.unwrap_err();
        assert!(!matches!(err, DockhandError::InstallationInProgress { .. }));
    }
}
