use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "drover", about = "Provider layer for the drover agent runtime", version)]
struct Cli {
    /// Path to drover.toml (default: ~/.drover/drover.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Model provider management
    #[command(subcommand)]
    Models(ModelsCommand),
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// Provider authentication
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Show configured providers, per-agent models, and credential status
    List,
    /// Per-provider usage totals and trend
    Stats {
        /// Trend window in days (default: today only)
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Delegate to an external CLI's interactive OAuth flow
    Login {
        /// Provider id: gemini or openai-codex
        #[arg(long)]
        provider: String,
    },
    /// Store a static API key (and base URL for self-hosted backends)
    SetKey {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        key: String,
        /// Required for scalytics-copilot and vllm
        #[arg(long)]
        base: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Models(ModelsCommand::Auth(AuthCommand::Login { provider })) => {
            commands::auth::login(&provider).await
        }
        Command::Models(ModelsCommand::Auth(AuthCommand::SetKey { provider, key, base })) => {
            match commands::auth::set_key(config_path, &provider, &key, base.as_deref()) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    1
                }
            }
        }
        Command::Models(ModelsCommand::List) => match commands::list::run(config_path).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        },
        Command::Models(ModelsCommand::Stats { days, json }) => {
            match commands::stats::run(config_path, days, json) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    1
                }
            }
        }
    }
}
