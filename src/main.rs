use clap::Parser;
use outlook_mcp::application::dispatch::Dispatcher;
use outlook_mcp::application::registry::ToolRegistry;
use outlook_mcp::application::session::{Session, SessionConfig};
use outlook_mcp::application::repl;
use outlook_mcp::cli::{Cli, Command};
use outlook_mcp::config::{self, AppConfig};
use outlook_mcp::infrastructure::graph::GraphClient;
use outlook_mcp::infrastructure::mcp::{McpProcess, ToolBackend};
use outlook_mcp::infrastructure::model::OpenAiClient;
use outlook_mcp::infrastructure::server;
use outlook_mcp::infrastructure::toolserver::ToolServer;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version exit zero; real parse errors exit non-zero.
            err.print().ok();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "Startup or runtime failure");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = cli.config.as_deref().map(Path::new);
    let config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }

    match cli.command {
        Command::Chat {
            server_command,
            server_args,
        } => run_chat(config, &server_command, &server_args).await,
        Command::ServeStdio => {
            let graph = graph_client(&config)?;
            info!("Starting stdio tool server");
            ToolServer::new(graph).run().await?;
            Ok(())
        }
        Command::ServeHttp { addr } => {
            let graph = graph_client(&config)?;
            let addr = addr.unwrap_or(config.http_addr);
            server::serve(graph, addr).await?;
            Ok(())
        }
    }
}

async fn run_chat(
    config: AppConfig,
    server_command: &str,
    server_args: &[String],
) -> Result<(), Box<dyn Error>> {
    debug!(command = server_command, "Spawning tool server subprocess");
    let process = McpProcess::connect(server_command, server_args).await?;

    let registry = match ToolRegistry::load(&process).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            process.shutdown().await;
            return Err(err.into());
        }
    };

    let provider = Arc::new(OpenAiClient::new(
        config.api_base.clone(),
        config::openai_api_key(),
    ));
    let backend: Arc<dyn ToolBackend> = Arc::new(process.clone());
    let dispatcher = Dispatcher::new(registry, backend);

    let mut session_config = SessionConfig::new(config.model.clone())
        .with_request_timeout(Duration::from_secs(config.request_timeout_secs));
    if let Some(prompt) = config.system_prompt.clone() {
        session_config = session_config.with_system_prompt(prompt);
    }
    let session = Session::new(dispatcher, provider, session_config);

    let outcome = repl::run(session).await;
    process.shutdown().await;
    outcome?;
    info!("Chat session finished");
    Ok(())
}

fn graph_client(config: &AppConfig) -> Result<GraphClient, Box<dyn Error>> {
    let token = config::graph_access_token()?;
    Ok(GraphClient::with_base_urls(
        token,
        config.graph_base_url.clone(),
        config.graph_beta_url.clone(),
    ))
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
