mod cmd;

use clap::{Parser, Subcommand};
use cmd::config::{Effective, RunArgs};

#[derive(Parser)]
#[command(name = "msgstream-sim", about = "Drives producers and a time-tick consumer over in-memory channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce random inserts between time ticks, consume and verify the packs
    Run(RunArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => match Effective::new(&args) {
            Ok(eff) => cmd::run::run(&eff).await,
            Err(e) => Err(e),
        },
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
