//! tokenflight CLI binary entry point.

use tokenflight::cli::{Cli, Commands, LogFormat};
use tokenflight::config::ClientConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        LogFormat::Text => {
            fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load(cli.config.as_deref())?;
    let refresher = tokenflight::cli::build_refresher(&config)?;

    match cli.command {
        Commands::SignIn(args) => tokenflight::cli::auth::handle_sign_in(&refresher, args).await,
        Commands::Status => tokenflight::cli::auth::handle_status(&refresher).await,
        Commands::Token => tokenflight::cli::auth::handle_token(&refresher).await,
        Commands::Refresh => tokenflight::cli::auth::handle_refresh(&refresher).await,
        Commands::SignOut => tokenflight::cli::auth::handle_sign_out(&refresher).await,
        Commands::Watch => tokenflight::cli::auth::handle_watch(&refresher).await,
    }
}
