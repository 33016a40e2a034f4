use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build {
        /// Include the btleplug backend
        #[arg(long)]
        ble: bool,
    },
    /// Run the test suite
    Test,
    /// Run the CLI; arguments after `--` are passed through
    Run {
        /// Include the btleplug backend
        #[arg(long)]
        ble: bool,

        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build { ble } => {
            println!("Building project...");
            let mut args = vec!["build", "--workspace"];
            if *ble {
                args.extend(["--features", "bklight-cli/ble"]);
            }
            cargo(&args, "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Run { ble, args: extra } => {
            println!("Running CLI...");
            let mut args = vec!["run", "-p", "bklight-cli"];
            if *ble {
                args.extend(["--features", "ble"]);
            }
            args.push("--");
            args.extend(extra.iter().map(String::as_str));
            cargo(&args, "Run")?;
        }
    }

    Ok(())
}
