//! Tramita CLI and REST API entry point.
//!
//! Binary name: `tramita`
//!
//! Parses CLI arguments, initializes the database and engine, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, DefinitionCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tramita", &mut std::io::stdout());
        return Ok(());
    }

    // The serve path gets the full tracing stack (optionally with OTel);
    // plain CLI commands use a verbosity-driven fmt subscriber. The guard
    // flushes buffered spans when main returns.
    let mut _tracing_guard = None;
    if let Commands::Serve { otel, .. } = &cli.command {
        _tracing_guard = Some(tramita_observe::tracing_setup::init_tracing(*otel)?);
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "info,tramita=debug",
            _ => "trace",
        };

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .init();
    }

    // Initialize application state (DB, engine)
    let state = AppState::init().await?;

    match cli.command {
        Commands::Definition { action } => match action {
            DefinitionCommand::Load { file, activate } => {
                cli::definition::load_definition(&state, &file, activate, cli.json).await?;
            }
            DefinitionCommand::List => {
                cli::definition::list_definitions(&state, cli.json).await?;
            }
            DefinitionCommand::Show { id } => {
                cli::definition::show_definition(&state, &id, cli.json).await?;
            }
            DefinitionCommand::Activate { id } => {
                cli::definition::set_definition_active(&state, &id, true, cli.json).await?;
            }
            DefinitionCommand::Deactivate { id } => {
                cli::definition::set_definition_active(&state, &id, false, cli.json).await?;
            }
        },

        Commands::Stats { id, from, to } => {
            cli::stats::stats(&state, &id, from.as_deref(), to.as_deref(), cli.json).await?;
        }

        Commands::Stale { id, threshold } => {
            cli::stats::stale(&state, &id, threshold, cli.json).await?;
        }

        Commands::Serve { bind, .. } => {
            let addr = bind.unwrap_or_else(|| state.config.bind_addr.clone());
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Tramita API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!(
                "  {}",
                console::style(format!("Data: {}", state.data_dir.display())).dim()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
