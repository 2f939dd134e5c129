//! # Autoflow — personal automation engine
//!
//! Usage:
//!   autoflow execute                     # Run every non-manual task once
//!   autoflow execute --tasks "tv-*,books" --test
//!   autoflow daemon                      # Run schedules until ctrl-c
//!   autoflow check                       # Validate the config file
//!   autoflow plugins --phase filter      # List plugins
//!   autoflow schedules                   # Show schedules and next fire times

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use autoflow_core::registry::install_global;
use autoflow_core::{AutoflowConfig, AutoflowError, Phase, PluginFilter, PluginRegistry, TaskOptions};
use autoflow_engine::{ExecutionResult, StreamLogLayer, StreamRecord};
use autoflow_manager::Manager;

#[derive(Parser)]
#[command(name = "autoflow", version, about = "⚙️ Autoflow — phase-ordered automation pipelines")]
struct Cli {
    /// Config file (default: ~/.autoflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run tasks once and exit
    Execute {
        /// Task names or glob patterns, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,
        /// Do not commit anything to the store
        #[arg(long)]
        test: bool,
        /// Remember entries without downloading or outputting them
        #[arg(long)]
        learn: bool,
        /// Print every entry with its final state
        #[arg(long)]
        dump: bool,
    },
    /// Run scheduled tasks until interrupted
    Daemon,
    /// Validate the config file and exit
    Check,
    /// List registered plugins
    Plugins {
        #[arg(long)]
        phase: Option<Phase>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        interface: Option<String>,
        /// Include config schemas (JSON output)
        #[arg(long)]
        schema: bool,
    },
    /// Show configured schedules
    Schedules,
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
        None => AutoflowConfig::default_path(),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "autoflow=debug" } else { "autoflow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(StreamLogLayer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut registry = PluginRegistry::new();
    autoflow_plugins::register_builtins(&mut registry)?;
    let registry = install_global(registry)?;
    let path = config_path(&cli);

    match cli.command {
        Command::Check => check(&path, &registry),
        Command::Plugins {
            phase,
            group,
            interface,
            schema,
        } => {
            let filter = PluginFilter {
                phase,
                group,
                interface,
            };
            plugins(&registry, filter, schema)
        }
        Command::Schedules => {
            let manager = open(&path, registry)?;
            for s in manager.schedules().await {
                let next = s.next_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into());
                println!("#{:<4} {:<30} next: {next}", s.id, s.config.tasks.names().join(","));
            }
            manager.shutdown().await;
            Ok(())
        }
        Command::Daemon => {
            let manager = open(&path, registry)?;
            println!("⚙️ Autoflow v{}", env!("CARGO_PKG_VERSION"));
            println!("   📂 Config: {}", path.display());
            println!("   🗄️  Database: {}", manager.config().daemon.db_path().display());
            manager.run_daemon().await?;
            Ok(())
        }
        Command::Execute {
            tasks,
            test,
            learn,
            dump,
        } => {
            let options = TaskOptions {
                test,
                learn,
                dump_entries: dump,
                ..TaskOptions::default()
            };
            let manager = open(&path, registry)?;
            let result = execute(&manager, &tasks, options).await;
            manager.shutdown().await;
            result
        }
    }
}

fn open(path: &std::path::Path, registry: Arc<PluginRegistry>) -> Result<Manager> {
    Manager::open(path, registry).map_err(|e| {
        print_validation_errors(&e);
        anyhow::anyhow!(e)
    })
}

fn print_validation_errors(e: &AutoflowError) {
    for detail in e.validation_errors() {
        eprintln!("   ❌ {detail}");
    }
}

fn check(path: &std::path::Path, registry: &PluginRegistry) -> Result<()> {
    match AutoflowConfig::load_from(path, registry) {
        Ok(config) => {
            println!(
                "✅ {} is valid: {} task(s), {} template(s), {} schedule(s)",
                path.display(),
                config.tasks.len(),
                config.templates.len(),
                config.schedules.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {}: {e}", path.display());
            print_validation_errors(&e);
            anyhow::bail!("config check failed")
        }
    }
}

fn plugins(registry: &PluginRegistry, filter: PluginFilter, schema: bool) -> Result<()> {
    let info = registry.info(filter, schema);
    if schema {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("{:<20} {:<10} {:<8} PHASES", "NAME", "CATEGORY", "BUILTIN");
    for p in info {
        let phases: Vec<String> = p.phases.iter().map(|ph| format!("{}({})", ph.phase, ph.priority)).collect();
        println!(
            "{:<20} {:<10} {:<8} {}",
            p.name,
            p.category.as_deref().unwrap_or("-"),
            if p.builtin { "yes" } else { "" },
            phases.join(", ")
        );
    }
    Ok(())
}

async fn execute(manager: &Manager, tasks: &[String], options: TaskOptions) -> Result<()> {
    let queued = manager.execute(tasks, options).context("no tasks to run")?;
    let mut failed = 0;

    for (task, id) in queued {
        if let Some(stream) = manager.stream(id) {
            for record in stream.collect().await {
                match record {
                    StreamRecord::Summary(s) if s.error.is_some() => {}
                    StreamRecord::Summary(s) => println!(
                        "📊 {task}: {} accepted, {} rejected, {} failed, {} undecided{}",
                        s.accepted,
                        s.rejected,
                        s.failed,
                        s.undecided,
                        s.abort_reason.map(|r| format!(" (aborted: {r})")).unwrap_or_default()
                    ),
                    StreamRecord::EntryDump(entries) => {
                        for entry in entries {
                            println!("   {entry}");
                        }
                    }
                    StreamRecord::Progress(_) | StreamRecord::Log(_) => {}
                }
            }
        }
        let record = manager.wait(id).await;
        if let Some(record) = record {
            if record.result == Some(ExecutionResult::Error) {
                failed += 1;
                eprintln!("❌ {task}: {}", record.message.unwrap_or_default());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} execution(s) failed");
    }
    Ok(())
}
