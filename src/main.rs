//! Faultline CLI entry point.
//!
//! Provides `check`, `render`, `send-test` and `panic` subcommands for
//! validating a configuration, previewing error pages, sending a test report
//! through the configured mail transport, and exercising the panic capture
//! path end to end.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use faultline::config::{self, FaultlineConfig};
use faultline::{classify, FaultHandler, RawFault};

/// Faultline: last-resort error reporting.
#[derive(Parser)]
#[command(name = "faultline", version, about)]
struct Cli {
    /// Path to the configuration file (default: ~/.faultline/faultline.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then summarise it.
    Check,
    /// Render the error page for a status code to stdout.
    Render {
        /// HTTP status code.
        status: u16,
    },
    /// Send a test report through the configured mail transport.
    SendTest {
        /// Message placed in the test report.
        #[arg(long, default_value = "faultline test notification")]
        message: String,
    },
    /// Install the capture hook and panic outside any request.
    Panic {
        /// Panic message.
        #[arg(long, default_value = "simulated unhandled fault")]
        message: String,
    },
}

/// Error used for `send-test` reports.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestFault(String);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_or_default(cli.config.as_deref())?;
    let _logging_guard = match &config.logs_dir {
        Some(dir) => Some(faultline::logging::init_production(dir)?),
        None => {
            faultline::logging::init_cli();
            None
        }
    };

    let handler = FaultHandler::from_config(&config)?;

    match cli.command {
        Command::Check => handle_check(&config, &handler),
        Command::Render { status } => handle_render(&handler, status),
        Command::SendTest { message } => handle_send_test(&handler, message),
        Command::Panic { message } => handle_panic(&handler, message),
    }
}

/// Summarise the loaded configuration.
fn handle_check(config: &FaultlineConfig, handler: &FaultHandler) -> anyhow::Result<()> {
    let views: Vec<String> = handler
        .renderer()
        .views()
        .iter()
        .map(|(key, template)| format!("{key}={template}"))
        .collect();

    info!(
        project = %config.project_name,
        debug = config.debug,
        suppressed = config.suppressed_status_codes.len(),
        promote_from = %config.promote_runtime_faults,
        views = %views.join(","),
        notifications = handler.notifier().is_some(),
        "configuration ok"
    );
    Ok(())
}

/// Print the rendered page for `status`.
fn handle_render(handler: &FaultHandler, status: u16) -> anyhow::Result<()> {
    let response = handler.renderer().render(status);
    println!("status: {}\n\n{}", response.status, response.body);
    Ok(())
}

/// Send one report and force delivery.
fn handle_send_test(handler: &FaultHandler, message: String) -> anyhow::Result<()> {
    let notifier = handler
        .notifier()
        .context("email notifications are not configured (or debug mode is on)")?;

    let fault = TestFault(message);
    let record = classify(RawFault::typed_error(&fault));
    notifier
        .notify(&record, None)
        .context("failed to deliver test notification")?;

    info!(recipients = ?notifier.policy().recipients, "test notification sent");
    Ok(())
}

/// Trigger a panic with the capture hook installed.
fn handle_panic(handler: &FaultHandler, message: String) -> anyhow::Result<()> {
    let _adapter = handler.capture_adapter().install()?;
    info!("capture hook installed, panicking");
    std::panic::panic_any(message)
}
