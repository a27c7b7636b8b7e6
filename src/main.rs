//! branchroute binary entry point.

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use branchroute::cli::{self, Cli};
use branchroute::ui::output;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// `--debug` selects the debug level; `RUST_LOG` overrides either way.
fn init_tracing(debug: bool) {
    let filter = if debug { "branchroute=debug" } else { "branchroute=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}
