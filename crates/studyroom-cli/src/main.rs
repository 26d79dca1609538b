use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "studyroom-cli", version, about = "Studyroom CLI")]
struct Cli {
    /// Act as this user id
    #[arg(long, global = true, env = "STUDYROOM_USER", default_value = "local")]
    user: String,

    /// Display name used when the user profile is first created
    #[arg(long, global = true, env = "STUDYROOM_USER_NAME")]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Study session management
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// User profiles
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Run an in-memory session and print its events
    Simulate(commands::simulate::SimulateArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studyroom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let requester = commands::requester(&cli.user, cli.name.as_deref());
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Session { action } => commands::session::run(action, &requester).await,
        Commands::User { action } => commands::user::run(action, &requester).await,
        Commands::Simulate(args) => commands::simulate::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
