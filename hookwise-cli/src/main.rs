// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hookwise CLI
//!
//! Command-line interface for discovering and running lifecycle hooks.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hookwise_core::CircuitState;
use hookwise_hooks::{
    EngineConfig, HealthStatus, HookContext, HookExecutionResult, HookManager, HookStateStore,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hookwise")]
#[command(about = "Hookwise - lifecycle hook execution engine", long_about = None)]
struct Cli {
    /// Hooks directory (overrides the config file)
    #[arg(long, global = true)]
    hooks_dir: Option<PathBuf>,

    /// Config file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Learned hook state file (default: <hooks-dir>/.hookwise-state.json)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered hooks and their inferred metadata
    List,

    /// Run every hook registered for an event
    Run {
        /// Event name, e.g. pre_tool_use
        event: String,

        /// Context entry as key=value; the value is parsed as JSON when possible
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Context as a JSON object, merged before --context entries
        #[arg(long)]
        context_json: Option<String>,

        /// Deadline for the whole batch in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Show system health
    Health,

    /// Show performance metrics, circuit breakers and pools
    Metrics,

    /// Show tuning recommendations for slow or unreliable hooks
    Recommend,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "hookwise=debug,hookwise_hooks=debug,hookwise_core=debug"
    } else {
        "hookwise=info,hookwise_hooks=info,hookwise_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_context(json: Option<&str>, pairs: &[String]) -> Result<HookContext> {
    let mut context = match json {
        Some(raw) => serde_json::from_str::<HookContext>(raw)
            .context("--context-json must be a JSON object")?,
        None => HookContext::new(),
    };
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid context entry '{}', expected KEY=VALUE", pair);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

/// Load learned state, falling back to an unpersisted store when the file
/// cannot be read.
fn load_state(path: &Path) -> HookStateStore {
    match HookStateStore::load(path) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            HookStateStore::new()
        }
    }
}

/// Run the hooks for `event` and persist what was learned.
async fn run_event(
    manager: &HookManager,
    state: &mut HookStateStore,
    event: &str,
    context: HookContext,
    deadline: Option<Duration>,
) -> Result<Vec<HookExecutionResult>> {
    let results = match deadline {
        Some(deadline) => {
            manager
                .execute_hooks_with_deadline(event, context, deadline)
                .await
        }
        None => manager.execute_hooks(event, context).await,
    }
    .with_context(|| format!("Failed to run hooks for '{}'", event))?;

    manager.capture_learned_state(state);
    state.save().context("Failed to save learned hook state")?;
    Ok(results)
}

fn print_results(results: &[HookExecutionResult]) {
    if results.is_empty() {
        println!("No hooks registered for this event.");
        return;
    }
    for result in results {
        let mark = if result.success { "✓" } else { "✗" };
        println!(
            "{} {} [{:?}] {:.1}ms, {} attempt(s)",
            mark, result.hook_id, result.outcome, result.execution_time_ms, result.attempts
        );
        if let Some(error) = &result.error {
            println!("    Error: {}", error);
        }
        if let Some(output) = &result.output {
            println!("    Output: {}", output);
        }
        if result.anomalous {
            println!("    Note: execution time was anomalous");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = EngineConfig::load(cli.config.clone()).context("Failed to load config")?;
    let hooks_dir = cli
        .hooks_dir
        .clone()
        .or_else(|| config.hooks_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".hooks"));
    config.hooks_dir = Some(hooks_dir.clone());
    let state_path = cli
        .state_file
        .clone()
        .unwrap_or_else(|| hooks_dir.join(".hookwise-state.json"));

    let manager = HookManager::new(config).context("Failed to initialize hook engine")?;
    let summary = manager.discover().context("Failed to discover hooks")?;
    let mut state = load_state(&state_path);
    manager.restore_learned_state(&state);
    let _sampler = manager.start_resource_sampling();

    match cli.command {
        Commands::List => {
            let hooks = manager.list_hooks();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hooks)?);
            } else if hooks.is_empty() {
                println!("No hooks found.");
            } else {
                println!("Hooks ({}):", hooks.len());
                println!("{:-<60}", "");
                for hook in &hooks {
                    let meta = &hook.metadata;
                    println!("{} -> {}", hook.id, meta.event);
                    println!(
                        "    Priority: {:?}, ~{:.0}ms, cost {}, {}",
                        meta.priority,
                        meta.estimated_time_ms,
                        meta.estimated_cost,
                        if meta.parallel_safe { "parallel" } else { "exclusive" }
                    );
                    println!("    Category: {:?}", meta.category);
                }
                if !summary.skipped.is_empty() {
                    println!();
                    println!("Skipped (no event match): {}", summary.skipped.join(", "));
                }
            }
        }

        Commands::Run {
            event,
            context,
            context_json,
            deadline_ms,
        } => {
            let context = parse_context(context_json.as_deref(), &context)?;
            let deadline = deadline_ms.map(Duration::from_millis);
            let results = run_event(&manager, &mut state, &event, context, deadline).await?;
            let failed = results.iter().filter(|r| !r.success).count();
            tracing::info!(event = %event, hooks = results.len(), failed, "Hook run finished");

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }

        Commands::Health => {
            let health = manager.check_system_health();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                println!("System health: {:?}", health.status);
                for check in &health.checks {
                    let mark = match check.status {
                        HealthStatus::Healthy => "✓",
                        HealthStatus::Warning => "!",
                        HealthStatus::Degraded => "✗",
                    };
                    println!("  {} {}: {}", mark, check.name, check.message);
                }
            }
        }

        Commands::Metrics => {
            let metrics = manager.get_performance_metrics();
            let breakers = manager.get_circuit_breaker_status();
            let pools = manager.get_connection_pool_info();
            if cli.json {
                let report = serde_json::json!({
                    "performance": metrics,
                    "circuit_breakers": breakers,
                    "connection_pools": pools,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Hookwise Metrics");
                println!("================");
                println!("Registered hooks: {}", metrics.registered_hooks);
                println!(
                    "Cache: {}/{} entries, hit rate {:.1}%",
                    metrics.cache.size,
                    metrics.cache.max_size,
                    metrics.cache.hit_rate * 100.0
                );
                match metrics.resources.current {
                    Some(current) => println!(
                        "Resources: CPU {:.1}%, memory {:.1} MB",
                        current.cpu_percent, current.memory_mb
                    ),
                    None => println!("Resources: N/A"),
                }
                println!();
                for (id, hook) in &metrics.hooks {
                    let circuit = match hook.circuit_state {
                        CircuitState::Closed => "closed",
                        CircuitState::Open => "OPEN",
                        CircuitState::HalfOpen => "half-open",
                    };
                    println!(
                        "  {} [{:?}] ~{:.0}ms, success {:.0}%, circuit {}",
                        id,
                        hook.priority,
                        hook.estimated_time_ms,
                        hook.success_rate * 100.0,
                        circuit
                    );
                }
            }
        }

        Commands::Recommend => {
            let recommendations = manager.get_hook_recommendations();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&recommendations)?);
            } else if recommendations.is_empty() {
                println!("No recommendations.");
            } else {
                for rec in &recommendations {
                    println!("{} ({:?}): {}", rec.hook_id, rec.kind, rec.message);
                }
            }
        }
    }

    manager.shutdown();
    Ok(())
}
