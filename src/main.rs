use std::{path::PathBuf, process::ExitCode};

use booking_xlsx::{Outcome, default_root, run};
use clap::{Parser, error::ErrorKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "update-excel",
    version,
    about = "Append one booking to its monthly sales report (xlsx)"
)]
struct Cli {
    /// Booking as JSON: {"date","customer_name","staff_name","visit_count"}
    booking: Option<String>,

    /// Project root holding data/excel and public/downloads
    #[arg(long, env = "BOOKING_REPORT_ROOT", value_name = "DIR")]
    root: Option<PathBuf>,

    #[arg(hide = true)]
    rest: Vec<String>,
}

fn main() -> ExitCode {
    // stdout занят под JSON-ответ, логи только в stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let outcome = match Cli::try_parse() {
        Ok(cli) => {
            let root = cli.root.unwrap_or_else(default_root);
            tracing::debug!(root = %root.display(), ignored = cli.rest.len(), "starting");
            run(&root, cli.booking.as_deref())
        }
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let message = e.to_string();
            Outcome::failure(message.lines().next().unwrap_or_default().trim())
        }
    };

    println!("{outcome}");
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
