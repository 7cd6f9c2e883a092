use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "dayweave-cli", version, about = "Dayweave daily planner")]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a day
    Plan(commands::plan::PlanArgs),
    /// Print the generator prompt for a day without planning it
    Prompt(commands::plan::InputArgs),
    /// Remove planned entries for a day from the calendar
    Clear(commands::plan::InputArgs),
    /// Show phase and anchor times for a day
    Phases(commands::phases::PhasesArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Plan(args) => commands::plan::run(args).await,
        Commands::Prompt(args) => commands::plan::prompt(args).await,
        Commands::Clear(args) => commands::plan::clear(args).await,
        Commands::Phases(args) => commands::phases::run(args),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e} ({})", e.code());
        std::process::exit(1);
    }
}
