//! Command line entry points.

use crate::agent::GmailAgentFactory;
use crate::config::{Config, StoreBackend};
use crate::llm::ChatClient;
use crate::orchestrator::{Orchestrator, RequestOutcome};
use crate::provision::{AuthorizationUrlBuilder, KlavisClient};
use crate::readiness::ReadinessProber;
use crate::registry::{InstanceRegistry, InstanceStore, MemoryStore, SqliteStore, UserInstance};
use crate::server::GateServer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-user Gmail MCP provisioning and OAuth gate
#[derive(Parser, Debug)]
#[command(name = "gmail-gate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Send one prompt on behalf of a user
    Ask(AskArgs),
    /// Finish a user's OAuth flow (wait for readiness, then mark authorized)
    Authorize(UserArgs),
    /// Show registered instances
    Status(StatusArgs),
    /// Reset a user's authorization
    Revoke(UserArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind, overriding the config file
    #[arg(short, long)]
    pub listen: Option<String>,
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    /// User the prompt belongs to
    #[arg(short, long)]
    pub user: String,

    /// The prompt (use "-" to read from stdin)
    #[arg(required = true)]
    pub prompt: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct UserArgs {
    #[arg(short, long)]
    pub user: String,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Only this user
    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
        .context("Failed to load config")
    }
}

/// Wire store, provisioning client, registry and agent factory from config.
///
/// Fails when the provisioning credentials are missing.
pub fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let credentials = config.provisioning_credentials()?;

    let store: Arc<dyn InstanceStore> = match config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => {
            let path = config.instances_db_path();
            Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
    };

    let registry = Arc::new(InstanceRegistry::new(
        store,
        Arc::new(KlavisClient::new(&config.provisioning, &credentials.api_key)),
        AuthorizationUrlBuilder::from_config(&config.provisioning, &credentials),
    ));

    let llm_key = config.openai_api_key.clone().unwrap_or_else(|| {
        warn!("OPENAI_API_KEY is not set; prompts from authorized users will fail");
        String::new()
    });
    let llm = Arc::new(ChatClient::new(&config.agent.llm_base_url, llm_key));
    // Hosted MCP servers accept the provisioning key as their bearer token.
    let agents = Arc::new(GmailAgentFactory::new(
        llm,
        config.agent.clone(),
        &credentials.api_key,
    ));

    Ok(Arc::new(Orchestrator::new(
        registry,
        agents,
        ReadinessProber::new(config.readiness.interval()),
        config.readiness.timeout(),
    )))
}

pub async fn run(cli: Cli) -> ExitCode {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<ExitCode> {
    let mut config = cli.load_config()?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(listen) = args.listen {
                config.listen_addr = listen;
            }
            config.llm_api_key()?;
            serve(&config).await
        }
        Commands::Ask(args) => {
            config.llm_api_key()?;
            ask(&config, args).await
        }
        Commands::Authorize(args) => authorize(&config, &args.user).await,
        Commands::Status(args) => status(&config, &args),
        Commands::Revoke(args) => {
            build_orchestrator(&config)?.registry().revoke(&args.user)?;
            println!("Revoked Gmail authorization for {}", args.user);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: &Config) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(config)?;
    let server = GateServer::bind(&config.listen_addr, orchestrator)
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    server.run(shutdown).await?;
    Ok(ExitCode::SUCCESS)
}

async fn ask(config: &Config, args: AskArgs) -> Result<ExitCode> {
    let prompt = if args.prompt == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        args.prompt
    };

    let orchestrator = build_orchestrator(config)?;
    let outcome = orchestrator.handle_request(&args.user, &prompt).await?;

    match args.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => match &outcome {
            RequestOutcome::NeedsAuth { authorization_url } => {
                println!("Gmail access is not authorized yet. Open this link to connect:");
                println!("{authorization_url}");
            }
            RequestOutcome::Response { response } => println!("{response}"),
        },
    }

    // Distinct code so scripts can tell "go authorize" from failure.
    Ok(match outcome {
        RequestOutcome::NeedsAuth { .. } => ExitCode::from(2),
        RequestOutcome::Response { .. } => ExitCode::SUCCESS,
    })
}

async fn authorize(config: &Config, user_id: &str) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(config)?;
    let outcome = orchestrator.complete_authorization(user_id).await?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(ExitCode::SUCCESS)
}

fn status(config: &Config, args: &StatusArgs) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(config)?;
    let registry = orchestrator.registry();
    let instances = match &args.user {
        Some(user) => registry.get(user)?.into_iter().collect(),
        None => registry.list()?,
    };

    match args.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&instances)?),
        OutputFormat::Text => {
            if instances.is_empty() {
                println!("No instances registered");
            }
            for instance in &instances {
                println!("{}", status_line(instance));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn status_line(instance: &UserInstance) -> String {
    let state = match (instance.authorized, instance.ready) {
        (false, _) => "pending",
        (true, true) => "ready",
        // Rerun `authorize` to check again.
        (true, false) => "starting",
    };
    format!(
        "{}\t{state}\t{}\t{}",
        instance.user_id,
        instance.instance_id,
        instance.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}
