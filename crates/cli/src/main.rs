use {
    clap::{Parser, Subcommand},
    skillcast_engine::{
        InstallScope,
        ledger::GithubProbe,
        manifest::discover_skills,
        ops::{AgentSelection, Engine, InstallOptions, InstallRequest},
        source::{ParsedSource, parse_source},
        types::{LinkStatus, UpdateStatus},
    },
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "skillcast", about = "Install agent skills once, fan them out everywhere")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install skills from a source (local path, owner/repo, or URL).
    Install {
        source: String,
        /// Install into the current project instead of the home directory.
        #[arg(long, value_enum, default_value = "global")]
        scope: Scope,
        /// Agent to present the skill to (repeatable). Defaults to detected agents.
        #[arg(long = "agent")]
        agents: Vec<String>,
        /// Present to every known agent, detected or not.
        #[arg(long, conflicts_with = "agents")]
        all_agents: bool,
        /// Overwrite a canonical entry whose content differs.
        #[arg(long, short)]
        force: bool,
    },
    /// Remove an installed skill, from selected agents or everywhere.
    Remove {
        name: String,
        #[arg(long, value_enum, default_value = "global")]
        scope: Scope,
        /// Agent to remove the skill from (repeatable). Defaults to all
        /// agents; the canonical copy is deleted once nothing references it.
        #[arg(long = "agent")]
        agents: Vec<String>,
    },
    /// List installed skills and their per-agent status.
    List {
        #[arg(long, value_enum, default_value = "global")]
        scope: Scope,
        /// Only show status for one agent.
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Check installed skills for remote updates.
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Show supported agents and whether they are detected.
    Agents,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Scope {
    Project,
    Global,
}

impl From<Scope> for InstallScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Project => Self::Project,
            Scope::Global => Self::Global,
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).without_time())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "skillcast starting");

    let engine = Engine::from_env()?;
    match cli.command {
        Commands::Install {
            source,
            scope,
            agents,
            all_agents,
            force,
        } => {
            let selection = if all_agents {
                AgentSelection::All
            } else if agents.is_empty() {
                AgentSelection::Detected
            } else {
                AgentSelection::Ids(agents)
            };
            let options = InstallOptions {
                scope: scope.into(),
                agents: selection,
                overwrite: force,
            };
            handle_install(&engine, &source, &options).await
        },
        Commands::Remove { name, scope, agents } => {
            let targets = if agents.is_empty() {
                AgentSelection::All
            } else {
                AgentSelection::Ids(agents)
            };
            handle_remove(&engine, &name, scope.into(), &targets).await
        },
        Commands::List { scope, agent, json } => {
            handle_list(&engine, scope.into(), agent.as_deref(), json)
        },
        Commands::Check { json } => handle_check(&engine, json).await,
        Commands::Agents => handle_agents(&engine).await,
    }
}

async fn handle_install(
    engine: &Engine,
    source: &str,
    options: &InstallOptions,
) -> anyhow::Result<()> {
    let parsed = parse_source(source)?;
    let root = match &parsed {
        ParsedSource::Local { path } => path.clone(),
        _ => anyhow::bail!(
            "fetching remote sources is not implemented yet; \
             clone '{source}' locally and install from the path"
        ),
    };
    if !root.is_dir() {
        anyhow::bail!("source path '{}' is not a directory", root.display());
    }

    let manifests = discover_skills(&root).await?;
    if manifests.is_empty() {
        anyhow::bail!("no SKILL.md found under '{}'", root.display());
    }

    let requests: Vec<InstallRequest> = manifests
        .iter()
        .map(|m| InstallRequest {
            skill_dir: m.path.clone(),
            source: source.to_string(),
            parsed: parsed.clone(),
            remote_identity: None,
            skill_path_in_source: m
                .path
                .strip_prefix(&root)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map(|rel| rel.display().to_string()),
        })
        .collect();

    let results = engine.install_all(&requests, options).await;
    let mut failures = 0usize;
    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(outcome) => {
                println!("installed {}", outcome.identity);
                for p in &outcome.presentations {
                    if p.success {
                        let how = if p.used_fallback_copy { "copy" } else { "link" };
                        println!("  {} -> {} ({how})", p.agent, p.path.display());
                    } else {
                        failures += 1;
                        println!(
                            "  {} FAILED: {}",
                            p.agent,
                            p.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            },
            Err(e) => {
                failures += 1;
                eprintln!("failed to install from {}: {e}", request.skill_dir.display());
            },
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} operation(s) failed");
    }
    Ok(())
}

async fn handle_remove(
    engine: &Engine,
    name: &str,
    scope: InstallScope,
    targets: &AgentSelection,
) -> anyhow::Result<()> {
    let outcome = engine.remove(name, scope, targets).await?;
    let mut failures = 0usize;
    for r in &outcome.removals {
        if r.success {
            println!("  {} removed {}", r.agent, r.path.display());
        } else {
            failures += 1;
            println!(
                "  {} FAILED: {}",
                r.agent,
                r.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if outcome.released_canonical {
        println!("removed {}", outcome.name);
    } else if outcome.still_referenced_by.is_empty() {
        println!("removed {} (no canonical entry found)", outcome.name);
    } else {
        println!(
            "kept canonical copy of {} (still referenced by: {})",
            outcome.name,
            outcome.still_referenced_by.join(", ")
        );
    }
    if failures > 0 {
        anyhow::bail!("{failures} removal(s) failed");
    }
    Ok(())
}

fn handle_list(
    engine: &Engine,
    scope: InstallScope,
    agent: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let rows = engine.list(scope, agent)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("no skills installed");
        return Ok(());
    }
    for row in rows {
        let key = match &row.namespace {
            Some(ns) => format!("{ns}/{}", row.name),
            None => row.name.clone(),
        };
        println!("{key}  ({})", row.source);
        for state in row.agents {
            let status = match state.status {
                LinkStatus::Linked => "linked",
                LinkStatus::Copied => "copied",
                LinkStatus::Missing => "missing",
            };
            println!("  {:16} {status}", state.agent);
        }
    }
    Ok(())
}

async fn handle_check(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let probe = GithubProbe::new();
    let reports = engine.check_updates(&probe).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("no skills installed");
        return Ok(());
    }
    for report in reports {
        let status = match report.status {
            UpdateStatus::UpToDate => "up to date",
            UpdateStatus::UpdateAvailable => "update available",
            UpdateStatus::Unchecked => "unchecked (no remote identity)",
        };
        println!("{:24} {status}", report.name);
    }
    Ok(())
}

async fn handle_agents(engine: &Engine) -> anyhow::Result<()> {
    let detected: Vec<&str> = engine
        .registry()
        .detect_installed()
        .await
        .iter()
        .map(|a| a.id)
        .collect();
    for agent in engine.registry().agents() {
        let mark = if detected.contains(&agent.id) {
            "detected"
        } else {
            "-"
        };
        println!("{:16} {:24} {mark}", agent.id, agent.display_name);
    }
    Ok(())
}
