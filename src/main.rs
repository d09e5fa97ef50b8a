use anyhow::{Context, anyhow};
use clap::Parser;
use devstack::cli::{Args, Commands, format_status, format_step};
use devstack::{
    CommandKind, ConfigDiscovery, Engine, Platform, Project, SystemConfig, env, load_engine,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devstack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn load_config(args: &Args) -> anyhow::Result<SystemConfig> {
    let config = match &args.config {
        Some(path) => SystemConfig::from_toml_file(path),
        None => ConfigDiscovery::discover_config(),
    };
    config.map_err(|e| anyhow!("Failed to load configuration: {}", e))
}

fn all_or_named(project: &Project, services: Vec<String>) -> Vec<String> {
    if services.is_empty() {
        project.services.keys().cloned().collect()
    } else {
        services
    }
}

async fn run(args: Args) -> anyhow::Result<i32> {
    if let Commands::ShowConfig = args.command {
        match ConfigDiscovery::find_config_file() {
            Some(path) => println!("Configuration file: {}", path.display()),
            None => println!("No configuration file found, using defaults"),
        }
        let config = load_config(&args)?;
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(0);
    }

    let config = load_config(&args)?;
    let project_dir = match &args.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let project = Project::discover(&project_dir)
        .with_context(|| format!("No project found from {}", project_dir.display()))?;
    let engine_name = args.engine.as_deref().unwrap_or(&config.engine);
    let engine: Arc<dyn Engine> = load_engine(engine_name, &config.engine_settings)?;
    info!("Using engine '{}' for project '{}'", engine.name(), project.name);

    let unsynced = config.performance_enabled(
        env::performance::DONT_SYNC_UNIMPORTANT_SRC,
        engine.as_ref(),
        Platform::current(),
    );

    match args.command {
        Commands::Start { services } => {
            let services = all_or_named(&project, services);
            let results = engine.start_project(&project, &services, unsynced)?;
            Ok(report(results).await)
        }
        Commands::Stop { services } => {
            let services = all_or_named(&project, services);
            let results = engine.stop_project(&project, &services)?;
            Ok(report(results).await)
        }
        Commands::Status { json } => {
            let status = engine.status(&project, &config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", format_status(&status));
            }
            Ok(0)
        }
        Commands::Cmd { name, service, arguments } => {
            let command = project.command(&name).ok_or_else(|| {
                anyhow!("Command '{}' not found in project '{}'", name, project.name)
            })?;
            let service = match (service, &command.in_service_with_role) {
                (Some(service), _) => Some(service),
                (None, Some(role)) if command.kind() == CommandKind::InService => {
                    let (service, _) = project.service_with_role(role).ok_or_else(|| {
                        anyhow!("No service with role {:?} for command '{}'", role, name)
                    })?;
                    Some(service.to_string())
                }
                _ => None,
            };
            let code = match service {
                Some(service) => {
                    engine
                        .cmd_in_service(&project, &name, &service, &arguments)
                        .await?
                }
                None => engine.cmd(&project, &name, &arguments, unsynced).await?,
            };
            Ok(i32::try_from(code).unwrap_or(1))
        }
        Commands::Exec { service, command, root, cols, lines } => {
            match command {
                Some(command) => {
                    engine
                        .exec_custom(&project, &service, &command, cols, lines, root)
                        .await?
                }
                None => engine.exec(&project, &service, cols, lines, root).await?,
            }
            Ok(0)
        }
        Commands::Fg { service, arguments } => {
            engine.service_fg(&project, &service, &arguments, unsynced).await?;
            Ok(0)
        }
        Commands::Pull => {
            let update = |text: &str| {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            };
            engine.pull_images(&project, "\r\x1b[2K", &update).await?;
            Ok(0)
        }
        Commands::ShowConfig => Ok(0),
    }
}

/// Print every step of a start/stop queue; non-zero if any target failed.
async fn report(mut results: devstack::MultiResultQueue<devstack::StartStopResultStep>) -> i32 {
    let mut failed = false;
    while let Some(step) = results.next().await {
        failed |= step.is_failure();
        println!("{}", format_step(&step));
    }
    i32::from(failed)
}
