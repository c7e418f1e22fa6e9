use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, name = "jobserver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run a standalone driver process that executes jobs as shell scripts")]
    Driver,
}

pub fn main(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(args);

    match cli.command {
        Command::Driver => crate::driver::run_driver(),
    }
}
