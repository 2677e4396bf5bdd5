use anyhow::Result;
use clap::Parser;
use portpolicy::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use cli::{Cli, Command, GateArgs, SnapshotCommand, selection};
use confirm::StdinConfirmer;
use docker_repo::DockerRepo;
use error::ReconcileError;
use executor::{ExecutionContext, ExecutorOptions, LogObserver, PlanSource, run_executor};
use worker::{JobDeps, JobRequest};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output (JSON); logs go to stderr.
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load()?;

    match run(cli.command, &app_config).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<ReconcileError>() {
            Some(r) if r.is_abort() => {
                eprintln!("aborted: {r}");
                Ok(())
            }
            _ => Err(e),
        },
    }
}

async fn run(command: Command, app_config: &config::AppConfig) -> Result<()> {
    match command {
        Command::Serve => serve(app_config).await,
        Command::State => {
            let loader = state_loader::StateLoader::new(&app_config.upstream)?;
            print_json(&loader.load_state().await?)
        }
        Command::Classify => {
            let loader = state_loader::StateLoader::new(&app_config.upstream)?;
            let overrides = app_config.policy.load_overrides()?;
            let state = loader.load_state().await?;
            print_json(&classifier::classify(&state, &overrides))
        }
        Command::Plan(args) => {
            let loader = state_loader::StateLoader::new(&app_config.upstream)?;
            let overrides = app_config.policy.load_overrides()?;
            let enforcement = args
                .enforce
                .merge_into(&app_config.policy.load_enforcement()?);
            enforcement.validate()?;
            let state = loader.load_state().await?;
            let (_, plan) = worker::forward_plan(
                &state,
                &overrides,
                &enforcement,
                &policy::PolicyRegistry::builtin(),
                true,
            );
            match args.out {
                Some(path) => {
                    tokio::fs::write(&path, serde_json::to_string_pretty(&plan)?).await?;
                    tracing::info!(
                        path = %path.display(),
                        actions = plan.action_count,
                        "plan written"
                    );
                    Ok(())
                }
                None => print_json(&plan),
            }
        }
        Command::Apply(args) => {
            if let Some(path) = args.plan_file {
                return apply_plan_file(app_config, path, &args.gates).await;
            }
            let deps = build_deps(app_config).await?;
            let enforcement = args.enforce.merge_into(&deps.default_enforcement);
            run_cli_job(
                &deps,
                JobRequest::Execute {
                    enforcement: Some(enforcement),
                    gates: args.gates.flags(),
                },
            )
            .await
        }
        Command::Rollback(args) => {
            let deps = build_deps(app_config).await?;
            run_cli_job(
                &deps,
                JobRequest::Rollback {
                    job_id: args.job_id,
                    containers: selection(&args.containers),
                    gates: args.gates.flags(),
                },
            )
            .await
        }
        Command::Restore(args) => {
            let deps = build_deps(app_config).await?;
            run_cli_job(
                &deps,
                JobRequest::Restore {
                    snapshot_id: args.snapshot_id,
                    containers: selection(&args.containers),
                    gates: args.gates.flags(),
                },
            )
            .await
        }
        Command::Snapshots { command } => {
            let snapshots = open_snapshots(app_config).await?;
            match command {
                SnapshotCommand::List => print_json(&snapshots.list().await?),
                SnapshotCommand::Show { job_id } => match snapshots.load(&job_id).await? {
                    Some(snapshot) => print_json(&snapshot),
                    None => Err(ReconcileError::NotFound(format!("snapshot '{job_id}'")).into()),
                },
                SnapshotCommand::Cleanup { older_than_days } => {
                    anyhow::ensure!(older_than_days > 0, "--older-than-days must be > 0");
                    let removed = snapshots
                        .cleanup_older_than(snapshot_repo::days(older_than_days))
                        .await?;
                    print_json(&serde_json::json!({ "removed": removed }))
                }
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_snapshots(
    app_config: &config::AppConfig,
) -> Result<Arc<snapshot_repo::SnapshotRepo>> {
    let snapshots = snapshot_repo::SnapshotRepo::connect(
        &app_config.storage.path,
        app_config.storage.retention_days,
    )
    .await?;
    snapshots.init().await?;
    Ok(Arc::new(snapshots))
}

async fn build_deps(app_config: &config::AppConfig) -> Result<JobDeps<DockerRepo>> {
    let docker_repo = DockerRepo::connect()?;
    docker_repo.ping().await?;
    Ok(JobDeps {
        loader: Arc::new(state_loader::StateLoader::new(&app_config.upstream)?),
        runtime: Arc::new(docker_repo),
        registry: jobs::JobRegistry::new(app_config.jobs.event_buffer_capacity),
        snapshots: open_snapshots(app_config).await?,
        audit: Arc::new(audit::AuditSink::new(&app_config.audit.path)),
        policies: Arc::new(policy::PolicyRegistry::builtin()),
        overrides: Arc::new(app_config.policy.load_overrides()?),
        default_enforcement: Arc::new(app_config.policy.load_enforcement()?),
    })
}

async fn run_cli_job(deps: &JobDeps<DockerRepo>, request: JobRequest) -> Result<()> {
    let job_id = deps.registry.create(request.kind());
    tracing::info!(job_id = %job_id, kind = request.kind().as_str(), "job started");
    let confirmer = StdinConfirmer::new();
    let result =
        worker::run_job(deps, &job_id, request, &confirmer, Some(&LogObserver)).await?;
    print_json(&serde_json::json!({ "jobId": job_id, "result": result }))
}

/// Execute a saved plan as-is; the live-ports check guards against a stale file.
async fn apply_plan_file(
    app_config: &config::AppConfig,
    path: std::path::PathBuf,
    gates: &GateArgs,
) -> Result<()> {
    let docker_repo = DockerRepo::connect()?;
    docker_repo.ping().await?;
    let audit = audit::AuditSink::new(&app_config.audit.path);
    let flags = gates.flags();
    let result = run_executor(
        ExecutorOptions {
            plan: PlanSource::File(path),
            apply: flags.apply,
            yes: flags.yes,
            allow_mutation: flags.allow_mutation,
            mutation_confirmed: flags.mutation_confirmed,
            dry_run: flags.dry_run,
        },
        &ExecutionContext {
            runtime: &docker_repo,
            confirmer: &StdinConfirmer::new(),
            observer: Some(&LogObserver),
            audit: Some(&audit),
            job_id: None,
        },
    )
    .await?;
    print_json(&result)
}

async fn serve(app_config: &config::AppConfig) -> Result<()> {
    let deps = build_deps(app_config).await?;
    tracing::info!(
        upstream = deps.loader.base_url(),
        policies = deps.policies.all().len(),
        "Services ready"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let pruner_handle = worker::spawn_retention_pruner(
        deps.snapshots.clone(),
        deps.registry.clone(),
        Duration::from_secs(app_config.jobs.retention_secs),
        app_config.storage.prune_interval_secs,
        shutdown_rx,
    );

    let app = routes::app(deps);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{SignalKind, signal};
                    let mut sigterm = match signal(SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = tokio::signal::ctrl_c().await;
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = pruner_handle.await;
            }
        }
    }

    Ok(())
}
