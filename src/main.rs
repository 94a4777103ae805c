use themata::cli::commands::{CliArgs, Commands};
use themata::cli::handlers::{handle_providers, handle_regen, handle_run};
use themata::util::logging;
use themata::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("themata v{} starting", VERSION);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Regen(regen_args) => handle_regen(regen_args).await,
        Commands::Providers => handle_providers().await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    if let Some(level) = &args.log_level {
        logging::with_level(level);
    } else if args.verbose {
        logging::with_level("debug");
    } else if args.quiet {
        logging::with_level("error");
    } else {
        logging::init_from_env();
    }
}
