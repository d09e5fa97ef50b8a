//! Contract conformance tests against the in-memory engine backend.
//!
//! Everything here holds for every backend; the memory engine only adds the
//! hooks needed to observe it (reachability, container snapshots, failure
//! injection).

use devstack::engine::memory::MemoryEngine;
use devstack::project::{Command, Logging, Role, Service};
use devstack::{
    Engine, EngineConfig, EngineError, EnginePaths, Project, StartStopResultStep, StepStatus,
};
use futures::StreamExt;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn shop(root: &std::path::Path) -> Project {
    Project::new("shop", root)
        .with_service(
            "web",
            Service::new("nginx:alpine")
                .with_role(Role::Src)
                .with_role(Role::Main)
                .with_port(80)
                .with_env("APP_ENV", "dev"),
        )
        .with_service("db", Service::new("mysql:8").with_role(Role::Db))
        .with_command("npm", Command::new("node:20", "npm"))
        .with_command("console", Command::in_service(Role::Main, "php bin/console"))
}

async fn start(
    engine: &MemoryEngine,
    project: &Project,
    services: &[&str],
) -> Vec<StartStopResultStep> {
    engine
        .start_project(project, &names(services), false)
        .unwrap()
        .terminal_results()
        .await
}

async fn stop(
    engine: &MemoryEngine,
    project: &Project,
    services: &[&str],
) -> Vec<StartStopResultStep> {
    engine
        .stop_project(project, &names(services))
        .unwrap()
        .terminal_results()
        .await
}

#[tokio::test]
async fn test_one_terminal_result_per_target() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    let mut queue = engine.start_project(&project, &names(&["web", "db"]), false).unwrap();
    let mut terminal = Vec::new();
    let mut progress_after_terminal = false;
    while let Some(step) = queue.next().await {
        if step.status == StepStatus::Progress && terminal.contains(&step.target) {
            progress_after_terminal = true;
        }
        if step.status != StepStatus::Progress {
            terminal.push(step.target.clone());
        }
    }
    terminal.sort();
    assert_eq!(terminal, names(&["db", "web"]));
    assert!(!progress_after_terminal);
    assert!(queue.next().await.is_none());
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    assert!(start(&engine, &project, &["web"]).await.iter().all(|s| s.is_success()));
    let again = start(&engine, &project, &["web"]).await;
    assert!(again[0].is_success());
    assert_eq!(again[0].message.as_deref(), Some("already running"));
    assert_eq!(engine.container(&project, "web").unwrap().start_count, 1);

    assert!(stop(&engine, &project, &["web"]).await[0].is_success());
    let again = stop(&engine, &project, &["web"]).await;
    assert!(again[0].is_success());
    assert_eq!(again[0].message.as_deref(), Some("not running"));

    // never started
    assert!(stop(&engine, &project, &["db"]).await[0].is_success());
}

#[tokio::test]
async fn test_concurrent_starts_of_one_service() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    let (a, b) = tokio::join!(
        start(&engine, &project, &["web"]),
        start(&engine, &project, &["web"])
    );
    assert!(a[0].is_success() && b[0].is_success());
    assert_eq!(engine.container(&project, "web").unwrap().start_count, 1);
    assert!(engine.service_status(&project, "web", &Default::default()).await.unwrap());
}

#[tokio::test]
async fn test_unknown_service_rejected_before_anything_starts() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    let err = engine
        .start_project(&project, &names(&["web", "cache"]), false)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "Service", .. }));
    assert!(engine.container(&project, "web").is_none());
}

#[tokio::test]
async fn test_one_failing_service_does_not_affect_others() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());
    engine.fail_start(&project, "db");

    let results = start(&engine, &project, &["web", "db"]).await;
    let db = results.iter().find(|s| s.target == "db").unwrap();
    let web = results.iter().find(|s| s.target == "web").unwrap();
    assert!(db.is_failure());
    assert!(web.is_success());

    let status = engine.status(&project, &Default::default()).await.unwrap();
    assert_eq!(status.get("web"), Some(&true));
    assert_eq!(status.get("db"), Some(&false));
}

#[tokio::test]
async fn test_projects_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let shop = shop(&tmp.path().join("shop"));
    let blog = Project::new("blog", tmp.path().join("blog"))
        .with_service("web", Service::new("nginx:alpine"))
        .with_service("api", Service::new("node:20"));

    start(&engine, &shop, &["web", "db"]).await;
    start(&engine, &blog, &["web", "api"]).await;

    assert_ne!(engine.container_name_for(&shop, "web"), engine.container_name_for(&blog, "web"));
    assert!(engine.can_reach(&shop, "web", "db"));
    assert!(!engine.can_reach(&shop, "web", "api"));
    assert!(!engine.can_reach(&blog, "web", "db"));

    // stopping one project's web leaves the other's running
    stop(&engine, &shop, &["web"]).await;
    assert!(engine.service_status(&blog, "web", &Default::default()).await.unwrap());
}

#[tokio::test]
async fn test_linked_projects_reach_each_other() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let shop = shop(&tmp.path().join("shop")).with_link("payments");
    let payments = Project::new("payments", tmp.path().join("payments"))
        .with_service("api", Service::new("node:20"));

    start(&engine, &payments, &["api"]).await;
    start(&engine, &shop, &["web"]).await;

    assert!(engine.can_reach(&shop, "web", "api"));
    assert!(engine.can_reach(&payments, "api", "web"));
}

#[tokio::test]
async fn test_host_bridge_hostnames_resolve() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        extra_hostnames: vec!["shop.test".to_string()],
        ..EngineConfig::default()
    };
    let engine = MemoryEngine::with_config(config);
    let project = shop(tmp.path());
    start(&engine, &project, &["web"]).await;

    assert!(engine.can_reach(&project, "web", devstack::env::DEFAULT_HOST_HOSTNAME));
    assert!(engine.can_reach(&project, "web", "shop.test"));
    assert!(!engine.can_reach(&project, "web", "elsewhere.test"));
}

#[tokio::test]
async fn test_web_service_with_environment() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("index.html"), "hello world").unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    assert_eq!(engine.address_for(&project, "web").await.unwrap(), None);
    start(&engine, &project, &["web"]).await;

    let (host, port) = engine.address_for(&project, "web").await.unwrap().unwrap();
    assert_eq!(host, "127.0.0.1");
    assert!(port > 0);
    assert_eq!(engine.container_env(&project, "web", "APP_ENV").as_deref(), Some("dev"));

    let printenv = Command::new("alpine", "printenv APP_ENV").with_env("APP_ENV", "dev");
    let (code, output) = engine.cmd_detached(&project, &printenv, false).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, "dev\n");

    let missing = Command::new("alpine", "printenv NOT_SET");
    let (code, output) = engine.cmd_detached(&project, &missing, false).await.unwrap();
    assert_eq!(code, 1);
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_web_and_env_services_together() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("index.html"), "hello world").unwrap();
    let mut web = Service::new("nginx:alpine").with_role(Role::Src).with_port(80);
    web.additional_volumes.insert(
        "html".to_string(),
        devstack::project::AdditionalVolume {
            host: ".".to_string(),
            container: "/usr/share/nginx/html".to_string(),
            mode: devstack::project::VolumeMode::Ro,
        },
    );
    let project = Project::new("scenario", tmp.path())
        .with_service("web", web)
        .with_service(
            "env",
            Service::new("alpine")
                .with_command("sleep 300")
                .with_env("TEST_ENV_KEY", "TEST_ENV_VALUE"),
        );
    let engine = MemoryEngine::new();
    let both = ["web", "env"];

    assert!(start(&engine, &project, &both).await.iter().all(StartStopResultStep::is_success));
    let status = engine.status(&project, &Default::default()).await.unwrap();
    assert_eq!(status.get("web"), Some(&true));
    assert_eq!(status.get("env"), Some(&true));

    assert!(engine.address_for(&project, "web").await.unwrap().is_some());
    assert_eq!(
        engine.container_env(&project, "env", "TEST_ENV_KEY").as_deref(),
        Some("TEST_ENV_VALUE")
    );
    assert_eq!(engine.container_env(&project, "env", "UNDEFINED_KEY"), None);
    engine
        .exec_custom(&project, "env", "printenv TEST_ENV_KEY", None, None, false)
        .await
        .unwrap();

    assert!(stop(&engine, &project, &both).await.iter().all(StartStopResultStep::is_success));
    let status = engine.status(&project, &Default::default()).await.unwrap();
    assert_eq!(status.get("web"), Some(&false));
    assert_eq!(status.get("env"), Some(&false));
    assert_eq!(engine.container_env(&project, "env", "TEST_ENV_KEY"), None);
}

#[tokio::test]
async fn test_commands() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    assert_eq!(engine.cmd(&project, "npm", &names(&["install"]), false).await.unwrap(), 0);
    engine.set_exit_code("npm test", 3);
    assert_eq!(engine.cmd(&project, "npm", &names(&["test"]), false).await.unwrap(), 3);

    // in-service commands cannot run as normal commands
    assert!(matches!(
        engine.cmd(&project, "console", &[], false).await,
        Err(EngineError::NotFound { .. })
    ));

    assert!(matches!(
        engine.cmd_in_service(&project, "console", "web", &[]).await,
        Err(EngineError::ServiceNotRunning { .. })
    ));
    start(&engine, &project, &["web"]).await;
    assert_eq!(
        engine
            .cmd_in_service(&project, "console", "web", &names(&["cache:clear"]))
            .await
            .unwrap(),
        0
    );
    let last = engine.invocations().pop().unwrap();
    assert_eq!(last.command_line.as_deref(), Some("php bin/console 'cache:clear'"));

    engine
        .cmd_in_service(&project, "console", "web", &names(&["about"]))
        .await
        .unwrap();
    let last = engine.invocations().pop().unwrap();
    assert_eq!(last.command_line.as_deref(), Some("php bin/console about"));
}

#[tokio::test]
async fn test_exec_requires_running_service() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    assert!(matches!(
        engine.exec(&project, "web", None, None, false).await,
        Err(EngineError::ServiceNotRunning { .. })
    ));
    start(&engine, &project, &["web"]).await;
    engine.exec(&project, "web", Some(120), Some(40), true).await.unwrap();
    engine
        .exec_custom(&project, "web", "ls -la", None, None, false)
        .await
        .unwrap();

    let invocations = engine.invocations();
    assert!(invocations.iter().any(|i| i.operation == "exec" && i.root));
    assert!(invocations
        .iter()
        .any(|i| i.operation == "exec_custom" && i.command_line.as_deref() == Some("ls -la")));
}

#[tokio::test]
async fn test_pull_continues_past_missing_images() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());
    engine.mark_image_missing("mysql:8");

    let updates = Mutex::new(Vec::new());
    let update = |text: &str| updates.lock().unwrap().push(text.to_string());
    engine.pull_images(&project, "<reset>", &update).await.unwrap();

    let updates = updates.into_inner().unwrap();
    assert!(updates
        .iter()
        .any(|u| u.starts_with("<reset>Warning: image mysql:8") && u.ends_with('\n')));
    assert!(updates.iter().any(|u| u.starts_with("<reset>Pulled nginx:alpine")));
    assert!(updates.iter().any(|u| u.starts_with("<reset>Pulled node:20")));
}

#[tokio::test]
async fn test_logging_writes_into_project() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let mut service = Service::new("nginx:alpine");
    service.logging = Logging {
        stdout: true,
        stderr: false,
    };
    let project = Project::new("logs", tmp.path()).with_service("web", service);

    start(&engine, &project, &["web"]).await;
    let log_dir = devstack::env::service_log_dir_path(tmp.path(), "web");
    assert!(log_dir.join("stdout.log").is_file());
    assert!(!log_dir.join("stderr.log").exists());
}

#[tokio::test]
async fn test_path_rm_stays_inside_project() {
    let tmp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    let cache = tmp.path().join("var/cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("entry"), "x").unwrap();
    engine.path_rm(&tmp.path().join("var"), &project).await.unwrap();
    assert!(!tmp.path().join("var").exists());

    // nothing there any more is still success
    engine.path_rm(&tmp.path().join("var"), &project).await.unwrap();

    let victim = outside.path().join("keep.txt");
    fs::write(&victim, "keep").unwrap();
    let err = engine.path_rm(&victim, &project).await.unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
    assert!(victim.exists());

    let sneaky = tmp.path().join("../").join(outside.path().file_name().unwrap()).join("keep.txt");
    assert!(matches!(engine.path_rm(&sneaky, &project).await, Err(EngineError::Permission(_))));
    assert!(victim.exists());
}

#[tokio::test]
async fn test_path_operations_checked_through_loaded_engine() {
    let tmp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let engine = devstack::load_engine("memory", &EngineConfig::default()).unwrap();
    let project = shop(tmp.path());

    let victim = outside.path().join("keep.txt");
    fs::write(&victim, "keep").unwrap();
    assert!(matches!(engine.path_rm(&victim, &project).await, Err(EngineError::Permission(_))));
    assert!(matches!(
        engine.path_copy(&victim, &outside.path().join("copy.txt"), &project).await,
        Err(EngineError::Permission(_))
    ));
    assert!(victim.exists());
    assert!(!outside.path().join("copy.txt").exists());

    engine.path_copy(&victim, &tmp.path().join("copy.txt"), &project).await.unwrap();
    assert_eq!(fs::read_to_string(tmp.path().join("copy.txt")).unwrap(), "keep");
}

#[cfg(unix)]
#[tokio::test]
async fn test_path_rm_rejects_symlink_escape() {
    let tmp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    fs::write(outside.path().join("secret"), "s").unwrap();
    std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();

    let err = engine
        .path_rm(&tmp.path().join("escape/secret"), &project)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
    assert!(outside.path().join("secret").exists());
}

#[tokio::test]
async fn test_path_copy() {
    let tmp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = shop(tmp.path());

    fs::create_dir_all(source.path().join("tree/nested")).unwrap();
    fs::write(source.path().join("tree/nested/file.txt"), "content").unwrap();

    let target = tmp.path().join("vendor/tree");
    engine
        .path_copy(&source.path().join("tree"), &target, &project)
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(target.join("nested/file.txt")).unwrap(), "content");

    let err = engine
        .path_copy(&source.path().join("tree"), &target, &project)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DestinationExists(_)));

    let outside = TempDir::new().unwrap();
    let err = engine
        .path_copy(&source.path().join("tree"), &outside.path().join("tree"), &project)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
    assert!(!outside.path().join("tree").exists());
}

#[tokio::test]
async fn test_service_fg_runs_with_arguments() {
    let tmp = TempDir::new().unwrap();
    let engine = MemoryEngine::new();
    let project = Project::new("fg", tmp.path())
        .with_service("worker", Service::new("php:8").with_command("php worker.php"));

    engine
        .service_fg(&project, "worker", &names(&["--queue", "mail jobs"]), false)
        .await
        .unwrap();
    let last = engine.invocations().pop().unwrap();
    assert_eq!(last.operation, "service_fg");
    assert_eq!(last.command_line.as_deref(), Some("php worker.php --queue 'mail jobs'"));

    assert!(matches!(
        engine.service_fg(&project, "missing", &[], false).await,
        Err(EngineError::NotFound { .. })
    ));
}
