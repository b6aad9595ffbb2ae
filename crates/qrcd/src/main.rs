use clap::{Parser, Subcommand};
use qrc_api::rest::health::init_start_time;
use qrc_api::{build_router, AppState};
use qrc_quota::PlanCatalog;
use qrcd::{describe_config, format_plan_table, load_config, shutdown_signal, DEFAULT_LOG_FILTER};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "qrcd",
    version = qrcd::DAEMON_VERSION,
    about = "QR Cloner usage quota and rate limit service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service in the foreground
    Run {
        /// Port to bind to (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
        /// Config file (defaults to ~/.qrcloner/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate the config file and print the effective settings
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the plan catalog
    Plans {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { port, config } => {
            let config = load_config(config.as_deref(), port)?;
            config.paths()?.ensure_config_dir()?;

            println!("QR Cloner quota service running...");
            println!();
            println!("  API:  http://{}:{}", config.host, config.port);
            println!();

            init_start_time();

            let state = AppState::new(config.clone())?.with_version(qrcd::DAEMON_VERSION);
            let purge_task = state.limiter.as_ref().map(|limiter| {
                limiter.spawn_purge_task(Duration::from_secs(
                    config.rate_limit.purge_interval_secs,
                ))
            });
            if state.limiter.is_none() {
                tracing::info!("Rate limiting disabled in config");
            }
            if config.quota.fail_open {
                tracing::warn!("Quota gate configured to fail open; store outages will allow usage");
            }

            let app = build_router(state);

            let addr: SocketAddr = config.bind_addr().parse()?;
            tracing::info!("Listening on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;

            if let Some(task) = purge_task {
                task.abort();
            }
            Ok(())
        }

        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref(), None)?;
            print!("{}", describe_config(&config)?);
            println!();
            println!("Config OK");
            Ok(())
        }

        Commands::Plans { json } => {
            let catalog = PlanCatalog::builtin();
            if json {
                println!("{}", serde_json::to_string_pretty(catalog.plans())?);
            } else {
                print!("{}", format_plan_table(&catalog));
            }
            Ok(())
        }

        Commands::Version => {
            println!("qrcd {}", qrcd::DAEMON_VERSION);
            Ok(())
        }
    }
}
