use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::*;
use service::{config::Config, logging::Logger};

mod app;
mod commands;

use app::App;

#[derive(Parser)]
#[command(name = "pulse", author, version)]
#[command(about = "Device-bound sessions and live updates for the analytics dashboard")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and bind the session to this device
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "PULSE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Renew the session token
    Refresh,
    /// Show the current session
    Status,
    /// Authenticated GET of an API path, printed as JSON
    Get { path: String },
    /// Check whether a navigation would be let through
    Gate,
    /// Follow live updates and the session expiry
    Watch {
        /// Renew automatically when the expiry warning is raised
        #[arg(long)]
        auto_renew: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    Config::load_dotenv();
    let cli = Cli::parse();
    Logger::init_logger(&cli.config);

    let app = match App::new(cli.config) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("{} {:#}", "✗".red(), err);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Login { email, password } => commands::login(&app, &email, &password).await,
        Command::Logout => commands::logout(&app).await,
        Command::Refresh => commands::refresh(&app).await,
        Command::Status => commands::status(&app),
        Command::Get { path } => commands::get(&app, &path).await,
        Command::Gate => commands::gate(&app),
        Command::Watch { auto_renew } => commands::watch(&app, auto_renew).await,
    };

    result.unwrap_or_else(|err| {
        eprintln!("{} {:#}", "✗".red(), err);
        ExitCode::FAILURE
    })
}
