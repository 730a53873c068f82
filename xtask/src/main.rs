use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Workspace tasks for the Hardwire PDM uploader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the core test suite
    Test,
    /// Run the uploader, forwarding any further arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    println!("{what}...");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build", "--workspace"], "Building workspace"),
        Commands::Test => cargo(&["test", "-p", "hwpdm-core"], "Testing hwpdm-core"),
        Commands::Run { args } => {
            let mut full = vec!["run", "-p", "hwpdm-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Running hwpdm")
        }
    }
}
