//! triage: operator CLI for the incident-response host agent

mod invoke;
mod trace;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{debug, info};
use triage_a2a::ClientCredentialsProvider;
use triage_core::config::HostConfig;
use triage_core::secrets::{self, identity_provider};
use triage_core::{HostRuntime, InvocationRequest, OrchestratorEvent};
use triage_gateway::GatewayServer;

use crate::invoke::{HostInvocation, invoke_host};

#[derive(Parser)]
#[command(name = "triage", version, about = "Route operator requests to remote A2A specialist agents")]
struct Cli {
    /// Config file (default: $TRIAGE_CONFIG, then config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve /invocations and /ping over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Run one orchestrator turn locally
    Run {
        #[arg(long)]
        prompt: String,
        /// Session id (default: a fresh UUID)
        #[arg(long)]
        session: Option<String>,
        /// Print one aggregated JSON summary instead of streaming
        #[arg(long)]
        json: bool,
    },
    /// Resolve and print every agent card
    Cards {
        #[arg(long)]
        session: Option<String>,
    },
    /// Send one message straight to a named agent
    Send {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        session: Option<String>,
        /// Print the task's execution trace instead of the answer
        #[arg(long)]
        trace: bool,
    },
    /// Invoke a deployed host runtime over HTTP
    #[command(name = "invoke-host")]
    InvokeHost {
        /// Invocation URL of the host runtime
        #[arg(long)]
        url: String,
        /// Secret path of the identity provider config for the host
        #[arg(long)]
        secret_path: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        session: Option<String>,
    },
}

fn session_or_new(session: Option<String>) -> String {
    session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    let path = HostConfig::resolve_path(path.map(PathBuf::as_path));
    let config = HostConfig::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    debug!(agents = config.agents.len(), "Loaded config from {}", path.display());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { bind } => {
            info!("triage v{} starting", env!("CARGO_PKG_VERSION"));
            let runtime = Arc::new(HostRuntime::from_config(config));
            GatewayServer::new(runtime).run(&bind).await
        }
        Commands::Run {
            prompt,
            session,
            json,
        } => cmd_run(config, prompt, session_or_new(session), json).await,
        Commands::Cards { session } => cmd_cards(config, session_or_new(session)).await,
        Commands::Send {
            agent,
            message,
            session,
            trace,
        } => cmd_send(config, &agent, &message, session_or_new(session), trace).await,
        Commands::InvokeHost {
            url,
            secret_path,
            prompt,
            session,
        } => cmd_invoke_host(config, &url, &secret_path, &prompt, session_or_new(session)).await,
    }
}

async fn cmd_run(config: HostConfig, prompt: String, session_id: String, json: bool) -> Result<()> {
    let runtime = HostRuntime::from_config(config);
    let request = InvocationRequest::new(prompt, session_id.clone());
    info!(session_id = %session_id, "Running turn");

    if json {
        let summary = runtime.handle_aggregated(&request).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut events = runtime.handle(&request).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            OrchestratorEvent::Token { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            OrchestratorEvent::AgentCards { cards } => {
                for card in cards {
                    match (card.card, card.error) {
                        (Some(card), _) => eprintln!("  {} -> {}", card.name, card.source_url),
                        (None, Some(error)) => eprintln!("  {} unavailable: {}", card.agent, error),
                        (None, None) => {}
                    }
                }
            }
            OrchestratorEvent::AgentReply { agent, text, .. } => {
                println!("\n[{agent}]\n{text}");
            }
            OrchestratorEvent::AgentFailure {
                agent,
                error,
                timeout,
            } => {
                let kind = if timeout { "timed out" } else { "failed" };
                eprintln!("\n[{agent}] {kind}: {error}");
            }
            OrchestratorEvent::Error { message } => eprintln!("\nerror: {message}"),
            OrchestratorEvent::Done { replies, failures } => {
                debug!(replies, failures, "Turn done");
            }
        }
    }
    Ok(())
}

async fn cmd_cards(config: HostConfig, session_id: String) -> Result<()> {
    let runtime = HostRuntime::from_config(config);
    let session = runtime.session(&session_id).await?;
    let cards = session.orchestrator().agent_cards().await;
    println!("{}", serde_json::to_string_pretty(&cards)?);
    Ok(())
}

async fn cmd_send(
    config: HostConfig,
    agent: &str,
    message: &str,
    session_id: String,
    trace: bool,
) -> Result<()> {
    let runtime = HostRuntime::from_config(config);
    let session = runtime.session(&session_id).await?;
    let reply = session.send_direct(agent, message).await?;

    match reply.task() {
        Some(task) if trace => print!("{}", trace::format_trace(task)),
        _ => {
            let text = reply
                .answer_text()
                .with_context(|| format!("{agent} returned no readable answer"))?;
            println!("{text}");
        }
    }
    Ok(())
}

async fn cmd_invoke_host(
    config: HostConfig,
    url: &str,
    secret_path: &str,
    prompt: &str,
    session_id: String,
) -> Result<()> {
    let store = secrets::from_config(&config.secrets);
    let idp = identity_provider(store.as_ref(), secret_path)
        .await
        .with_context(|| format!("failed to load identity provider config from {secret_path}"))?;
    let credentials = ClientCredentialsProvider::new().with_timeout(config.host.token_timeout());

    eprintln!("Invoking for session: {session_id}");
    let invocation = HostInvocation {
        url,
        session_id: &session_id,
        prompt,
        timeout: config.host.call_timeout(),
    };
    let seen = invoke_host(&invocation, &credentials, &idp, |payload| println!("{payload}")).await?;
    debug!(payloads = seen, "Invocation finished");
    Ok(())
}
