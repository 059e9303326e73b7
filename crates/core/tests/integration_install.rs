//! End-to-end installer tests without git, docker or network
//!
//! `git clone` and every docker/compose command are scripted through
//! `MockRunner`; existence probes and env template copies run against real
//! temporary directories.

mod common;

use common::{descriptor, installer, runner_cloning, Workspace, SOLUTION};
use dockhand_core::command::mock::MockResponse;
use dockhand_core::env_file::parse_env_file;
use dockhand_core::errors::DockhandError;
use dockhand_core::registry::InstallKind;
use std::fs;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_single_container_root_dockerfile() {
    let workspace = Workspace::new();
    workspace.write_root_env("API_KEY=sk-root\nUNUSED=\n");
    let runner = runner_cloning(&[
        ("Dockerfile", "FROM scratch\n"),
        ("env.example", "API_KEY=\nPORT=3100\n"),
    ]);
    let mut solution = descriptor(InstallKind::SingleContainer);
    solution.env_file = Some("env.example".to_string());

    let outcome = installer(&workspace, &runner, solution)
        .install(SOLUTION)
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.port, 3100);
    assert_eq!(outcome.solution, SOLUTION);

    let builds = runner.commands_starting_with("docker build");
    assert_eq!(builds.len(), 1);
    assert!(builds[0].starts_with("docker build -t demo-img "));
    assert!(builds[0].contains(r#"--build-arg API_KEY="sk-root""#));
    assert!(builds[0].contains(r#"--build-arg PORT="3100""#));
    assert!(!builds[0].contains("UNUSED"));

    assert_eq!(
        runner.commands_starting_with("docker rm -f demo-container").len(),
        1
    );
    assert_eq!(
        runner.commands_starting_with("docker run"),
        vec!["docker run -d --name demo-container --network test-network -p 3100:3100 demo-img"]
    );
    assert!(workspace.repo().join(".env").exists());
}

#[tokio::test]
async fn test_single_container_missing_template_fails_env_setup() {
    let workspace = Workspace::new();
    let runner = runner_cloning(&[("Dockerfile", "FROM scratch\n")]);
    let mut solution = descriptor(InstallKind::SingleContainer);
    solution.env_file = Some("env.example".to_string());

    let err = installer(&workspace, &runner, solution)
        .install(SOLUTION)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DockhandError::InstallationFailed {
            stage: "env-setup",
            ..
        }
    ));
    assert!(runner.commands_starting_with("docker build").is_empty());
}

#[tokio::test]
async fn test_subdirectory_dockerfiles_run_frontend() {
    let workspace = Workspace::new();
    let runner = runner_cloning(&[
        ("api/Dockerfile", "FROM scratch\n"),
        ("frontend/Dockerfile", "FROM scratch\n"),
    ]);

    installer(&workspace, &runner, descriptor(InstallKind::SingleContainer))
        .install(SOLUTION)
        .await
        .unwrap();

    let mut builds = runner.commands_starting_with("docker build");
    builds.sort();
    assert_eq!(builds.len(), 2);
    assert!(builds[0].starts_with("docker build -t demo-img-api "));
    assert!(builds[0].ends_with("/demo/api"));
    assert!(builds[1].starts_with("docker build -t demo-img-frontend "));

    let runs = runner.commands_starting_with("docker run");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].ends_with(" demo-img-frontend"));
}

#[tokio::test]
async fn test_no_build_descriptor_fails_without_container() {
    let workspace = Workspace::new();
    let runner = runner_cloning(&[("README.md", "# nothing to build\n")]);

    let err = installer(&workspace, &runner, descriptor(InstallKind::MultiService))
        .install(SOLUTION)
        .await
        .unwrap_err();

    match err {
        DockhandError::InstallationFailed { stage, source, .. } => {
            assert_eq!(stage, "building");
            assert!(matches!(
                *source,
                DockhandError::NoBuildDescriptorFound { ref repository } if repository == "https://example.com/demo.git"
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(runner.commands_starting_with("docker build").is_empty());
    assert!(runner.commands_starting_with("docker run").is_empty());
}

#[tokio::test]
async fn test_reinstall_starts_from_empty_workspace() {
    let workspace = Workspace::new();
    common::write_file(
        &workspace.repo().join("stale/Dockerfile"),
        "FROM scratch\n",
    )
    .unwrap();
    let runner = runner_cloning(&[("README.md", "fresh clone\n")]);

    let err = installer(&workspace, &runner, descriptor(InstallKind::SingleContainer))
        .install(SOLUTION)
        .await
        .unwrap_err();

    assert!(!workspace.repo().join("stale").exists());
    assert!(workspace.repo().join("README.md").exists());
    assert!(matches!(
        err,
        DockhandError::InstallationFailed {
            stage: "building",
            ..
        }
    ));
}

#[tokio::test]
async fn test_compose_stack_uses_merged_env_and_restores_it() {
    let workspace = Workspace::new();
    workspace.write_root_env("A=1\nB=2\n");
    let runner = runner_cloning(&[
        ("docker-compose.yml", "services: {}\n"),
        ("Dockerfile", "FROM scratch\n"),
        (".env.example", "B=3\nC=4\n"),
        ("services/api/.env.example", "X=1\n"),
    ]);

    let repo = workspace.repo();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let env_path = repo.join(".env");
    runner.on_with("cd ", MockResponse::success(), move |_| {
        let content = fs::read_to_string(&env_path).unwrap_or_default();
        captured.lock().unwrap().push(content);
        Ok(())
    });

    let mut solution = descriptor(InstallKind::MultiService);
    solution.env_file = Some(".env.example".to_string());
    solution.additional_ports = vec![9001, 9002];
    solution
        .env_defaults
        .insert("NODE_ENV".to_string(), "production".to_string());

    installer(&workspace, &runner, solution)
        .install(SOLUTION)
        .await
        .unwrap();

    let ups: Vec<String> = runner
        .history()
        .into_iter()
        .filter(|c| c.starts_with("cd ") && c.ends_with("up -d --build"))
        .collect();
    assert_eq!(ups.len(), 1);
    assert!(ups[0].contains("docker-compose up -d --build"));
    assert_eq!(runner.commands_starting_with("docker ps -q --filter").len(), 2);
    assert!(runner.commands_starting_with("docker build").is_empty());

    // The compose run saw the merged variables.
    let during = dockhand_core::env_file::parse_env_str(seen.lock().unwrap().last().unwrap());
    assert_eq!(during.get("A").map(String::as_str), Some("1"));
    assert_eq!(during.get("B").map(String::as_str), Some("3"));
    assert_eq!(during.get("NODE_ENV").map(String::as_str), Some("production"));

    // Afterwards the repository file is back to its seeded content.
    let after = parse_env_file(&repo.join(".env")).unwrap();
    assert!(!after.contains_key("A"));
    assert_eq!(after.get("C").map(String::as_str), Some("4"));
    assert!(!repo.join(".env.temp").exists());
    assert!(!repo.join(".env.backup").exists());
    assert!(repo.join("services/api/.env").exists());
}

#[tokio::test]
async fn test_failed_compose_up_still_restores_env() {
    let workspace = Workspace::new();
    workspace.write_root_env("SECRET=from-root\n");
    let runner = runner_cloning(&[
        ("compose.yaml", "services: {}\n"),
        (".env.example", "SECRET=\nMODE=dev"),
    ]);
    runner.on("cd ", MockResponse::success());
    let repo = workspace.repo();
    let up_prefix = format!("cd {} && docker-compose up", repo.display());
    runner.on(
        up_prefix,
        MockResponse::failure(1).with_stderr("service failed to start"),
    );

    let err = installer(&workspace, &runner, descriptor(InstallKind::MultiService))
        .install(SOLUTION)
        .await
        .unwrap_err();

    match &err {
        DockhandError::InstallationFailed { stage, command, .. } => {
            assert_eq!(*stage, "building");
            assert!(command.as_deref().unwrap().ends_with("up -d --build"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(repo.join(".env")).unwrap(),
        "SECRET=\nMODE=dev"
    );
    assert!(!repo.join(".env.temp").exists());
    assert!(!repo.join(".env.backup").exists());
}

#[tokio::test]
async fn test_flaky_compose_version_uses_standalone_on_path() {
    let workspace = Workspace::new();
    let runner = runner_cloning(&[("docker-compose.yml", "services: {}\n")]);
    runner.on("docker-compose version", MockResponse::failure(127));
    runner.on("docker compose version", MockResponse::failure(1));
    runner.on(
        "which docker-compose",
        MockResponse::success().with_stdout("/usr/bin/docker-compose\n"),
    );

    installer(&workspace, &runner, descriptor(InstallKind::MultiService))
        .install(SOLUTION)
        .await
        .unwrap();

    let ups: Vec<String> = runner
        .history()
        .into_iter()
        .filter(|c| c.ends_with("up -d --build"))
        .collect();
    assert_eq!(ups.len(), 1);
    assert!(ups[0].ends_with("&& docker-compose up -d --build"));
    assert!(runner.commands_starting_with("test -x").is_empty());
}

#[tokio::test]
async fn test_single_container_ignores_compose_file() {
    let workspace = Workspace::new();
    let runner = runner_cloning(&[
        ("docker-compose.yml", "services: {}\n"),
        ("Dockerfile", "FROM scratch\n"),
    ]);

    installer(&workspace, &runner, descriptor(InstallKind::SingleContainer))
        .install(SOLUTION)
        .await
        .unwrap();

    assert!(runner.commands_starting_with("cd ").is_empty());
    assert!(runner.commands_starting_with("docker-compose").is_empty());
    assert_eq!(runner.commands_starting_with("docker build").len(), 1);
}
