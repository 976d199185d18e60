// crates/relaycli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{RunnerLogEvent, RuntimeEvent, Value, Variables};
use relayruntime::engine::{InMemoryEngine, JobOutcome};
use relayruntime::{DylibArchiveLoader, Filter, ManifestArchiveLoader, RelayRuntime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay runner runtime CLI", long_about = None)]
struct Cli {
    /// Runtime configuration as a JSON file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the runners known to the runtime
    Runners {
        /// Also scan this directory for archives
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Load the archives of a directory and report what was found
    Validate {
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Execute one job on a runner, locally
    Exec {
        /// Runner type, for example c-set-variables
        runner_type: String,

        /// Job variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        /// Custom header, as name=value
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Runners { dir } => list_runners(config, dir).await?,
        Commands::Validate { dir } => validate_archives(config, dir).await?,
        Commands::Exec {
            runner_type,
            variables,
            headers,
        } => execute_job(config, runner_type, variables, headers).await?,
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::from_env());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Can't read {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("Invalid configuration {}", path.display()))?;
    Ok(config)
}

fn build_runtime(config: RuntimeConfig) -> (RelayRuntime, InMemoryEngine) {
    let engine = InMemoryEngine::new();
    let runtime = RelayRuntime::builder(config, Arc::new(engine.clone()))
        .embedded(relayrunners::embedded_catalog())
        .archive_loader(Arc::new(
            DylibArchiveLoader::in_temp_dir()
                .with_fallback(Arc::new(ManifestArchiveLoader::new(relayrunners::class_catalog()))),
        ))
        .build();
    (runtime, engine)
}

async fn list_runners(mut config: RuntimeConfig, dir: Option<PathBuf>) -> Result<()> {
    if dir.is_some() {
        config.upload_path = dir;
    }
    let (runtime, _engine) = build_runtime(config);
    runtime.discovery().init().await?;

    println!("📦 Runners:");
    println!();
    for information in runtime.admin().list_runners(false, false).await {
        let definition = &information.definition;
        let kind = information
            .kind
            .map(|k| format!("{:?}", k))
            .unwrap_or_else(|| "?".to_string());
        let origin = match &definition.archive {
            Some(archive) => format!("archive {}", archive),
            None => "embedded".to_string(),
        };
        println!("  • {} [{}] {} ({})", definition.runner_type, kind, information.label, origin);
        if let Some(descriptor) = &information.descriptor {
            if !descriptor.description.is_empty() {
                println!("    {}", descriptor.description);
            }
        }
        for error in &information.definition_errors {
            println!("    ❌ {}", error);
        }
    }
    Ok(())
}

async fn validate_archives(mut config: RuntimeConfig, dir: PathBuf) -> Result<()> {
    println!("🔍 Validating archives in: {}", dir.display());
    config.upload_path = Some(dir);
    config.force_refresh = true;
    let (runtime, _engine) = build_runtime(config);

    let definitions = runtime.discovery().load_storage_from_upload_path().await?;
    let storage = runtime.discovery().storage();

    let archives = storage.archives().await;
    if archives.is_empty() {
        println!("No archive found");
    }
    let mut invalid = 0;
    for archive in archives {
        println!();
        println!("📋 {}", archive.name);
        for line in archive.load_log.split(';').filter(|l| !l.trim().is_empty()) {
            println!("   {}", line.trim());
        }
        for definition in storage.definitions(&Filter::by_archive(&archive.name)).await {
            let errors = match runtime.discovery().runner_for_definition(&definition).await {
                Some(runner) => runner.check_valid_definition(),
                None => vec!["can't be rebuilt from the archive".to_string()],
            };
            if errors.is_empty() {
                println!("   ✅ {} ({})", definition.name, definition.runner_type);
            } else {
                invalid += 1;
                println!("   ❌ {} ({}): {}", definition.name, definition.runner_type, errors.join("; "));
            }
        }
    }

    println!();
    println!("{} runners found, {} invalid", definitions.len(), invalid);
    if invalid > 0 {
        anyhow::bail!("{} runners have an invalid definition", invalid);
    }
    Ok(())
}

fn parse_variables(text: Option<String>) -> Result<Variables> {
    let Some(text) = text else {
        return Ok(Variables::new());
    };
    match serde_json::from_str::<serde_json::Value>(&text)? {
        serde_json::Value::Object(object) => Ok(object.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => Err(anyhow::anyhow!("Variables must be a JSON object")),
    }
}

async fn execute_job(
    mut config: RuntimeConfig,
    runner_type: String,
    variables: Option<String>,
    headers: Vec<String>,
) -> Result<()> {
    let variables = parse_variables(variables)?;
    config.start_framework_runners = true;
    let (runtime, engine) = build_runtime(config);

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RuntimeEvent::RunnerLog { event, .. } => match event {
                    RunnerLogEvent::Info { message } => println!("     ℹ️  {}", message),
                    RunnerLogEvent::Warning { message } => println!("     ⚠️  {}", message),
                    RunnerLogEvent::Progress { percent, message } => {
                        println!("     📊 {}% {}", percent, message.unwrap_or_default())
                    }
                },
                RuntimeEvent::ExecutionRecorded { record } => {
                    println!("  ⏱️  {:?} in {}ms", record.status, record.duration_ms);
                }
                _ => {}
            }
        }
    });

    runtime.start().await?;
    if !runtime.dispatch().is_running(&runner_type).await {
        runtime.shutdown().await;
        anyhow::bail!("No runner is running for type [{}]", runner_type);
    }

    println!("🚀 Executing {}", runner_type);
    let mut job = engine.next_job(&runner_type, variables);
    for header in headers {
        let (name, value) = header
            .split_once('=')
            .with_context(|| format!("Header [{}] must be name=value", header))?;
        job = job.with_header(name, value);
    }
    let outcome = engine.run_activated(job).await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();
    runtime.shutdown().await;

    println!();
    match outcome {
        JobOutcome::Completed(variables) => {
            println!("✨ Completed");
            let mut names: Vec<&String> = variables.keys().collect();
            names.sort();
            for name in names {
                println!("   {}: {}", name, variables[name]);
            }
        }
        JobOutcome::DomainError { code, message } => {
            println!("💥 Error [{}] {}", code, message);
        }
        JobOutcome::Failed { retries, message } => {
            println!("❌ Failed ({} retries left): {}", retries, message);
        }
    }
    Ok(())
}
