use clap::{Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("devlens")
        .version(VERSION)
        .about("DevLens - repository analysis pipeline and API")
        .subcommand(
            Command::new("serve")
                .about("Start the HTTP API server")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Override the configured API port"),
                ),
        )
        .subcommand(
            Command::new("worker")
                .about("Start the analysis pipeline worker (parse, embed, analyze)"),
        )
        .subcommand(
            Command::new("migrate")
                .about("Apply pending database migrations and exit")
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("List pending migrations without applying them"),
                ),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .get_matches();

    let config = devlens_runtime::config::Config::from_env()?;

    match matches.subcommand() {
        Some(("serve", sub)) => {
            let mut config = config;
            if let Some(port) = sub.get_one::<String>("port") {
                config.api.port = port.parse()?;
            }
            devlens_runtime::api::serve(config).await?;
        }
        Some(("worker", _)) => {
            devlens_runtime::workers::run(config).await?;
        }
        Some(("migrate", sub)) => {
            let dry_run = sub.get_flag("dry-run");
            devlens_runtime::db::migrate(&config, dry_run).await?;
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}
