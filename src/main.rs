//! hostdb server binary.
//!
//! ```text
//! hostdb server -c config/settings.toml   run until SIGINT/SIGTERM (SIGHUP reloads)
//! hostdb check  -c config/settings.toml   validate a config file and list tenants
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use hostdb::config::load_config;
use hostdb::database::DEFAULT_DATABASE;
use hostdb::Lifecycle;

#[derive(Parser)]
#[command(name = "hostdb", version)]
#[command(about = "Multi-tenant HTTP server with a host-keyed database registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        #[arg(short, long, default_value = "config/settings.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file
    Check {
        #[arg(short, long, default_value = "config/settings.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => serve(config).await,
        Commands::Check { config } => check(config),
    }
}

async fn serve(config: PathBuf) -> ExitCode {
    let app = match Lifecycle::new(config).start().await {
        Ok(app) => app,
        Err(err) => {
            // Logging may not be installed yet.
            eprintln!("hostdb: startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match app.run_until_signal().await {
        Ok(report) => {
            if !report.abandoned_jobs.is_empty() {
                tracing::warn!(jobs = ?report.abandoned_jobs, "Jobs abandoned during shutdown");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Shutdown failed");
            eprintln!("hostdb: {err}");
            ExitCode::FAILURE
        }
    }
}

fn check(config: PathBuf) -> ExitCode {
    let doc = match load_config(&config) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("{}: {err}", config.display());
            return ExitCode::FAILURE;
        }
    };

    println!("{}: ok", config.display());
    println!(
        "listen  {} (mode {}, tls {})",
        doc.application.bind_address(),
        doc.application.mode,
        if doc.ssl.enable { "on" } else { "off" }
    );
    println!("{:<32} {:<10} required", "tenant", "driver");
    println!("{:<32} {:<10} yes", DEFAULT_DATABASE, doc.database.driver.as_str());
    for (host, db) in &doc.databases {
        println!(
            "{:<32} {:<10} {}",
            host,
            db.driver.as_str(),
            if db.required { "yes" } else { "no" }
        );
    }
    ExitCode::SUCCESS
}
