use clap::Parser;

use tidewatch::cli::commands;
use tidewatch::cli::{Cli, Commands};
use tidewatch::config::Settings;
use tidewatch::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Init must work even when an existing config is broken
    if let Commands::Init { force } = cli.command {
        logging::init();
        exit_on_error(commands::init::run_init(force));
        return;
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_with_config(&settings.logging);

    let result = match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Config => commands::init::run_config(&settings),
        Commands::Watch {
            root,
            debounce_ms,
            servers,
        } => {
            let args = commands::watch::WatchArgs {
                root,
                debounce_ms,
                servers,
            };
            commands::watch::run(args, settings).await
        }
        Commands::Limits => commands::limits::run(),
        Commands::Match {
            pattern,
            base,
            paths,
        } => commands::match_pattern::run(&pattern, base.as_deref(), &paths).map(drop),
        Commands::CheckIgnore { root, paths } => {
            commands::check_ignore::run(root.as_deref(), &paths, &settings).map(drop)
        }
    };

    exit_on_error(result);
}

fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
