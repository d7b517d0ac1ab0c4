pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "helpdesk")]
#[command(about = "Helpdesk API - IT ticketing and resource management server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Apply pending migrations before listening")]
        migrate: bool,
    },

    #[command(about = "Apply pending database migrations and exit")]
    Migrate,

    #[command(about = "Create the first super admin account")]
    CreateSuperAdmin {
        #[arg(long, help = "Display name")]
        name: String,
        #[arg(long, help = "Login email")]
        email: String,
        #[arg(long, env = "HELPDESK_ADMIN_PASSWORD", help = "Password (at least 8 characters)")]
        password: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command.unwrap_or(Commands::Serve { migrate: false }) {
        Commands::Serve { migrate } => commands::serve::handle(migrate).await,
        Commands::Migrate => commands::migrate::handle(output_format).await,
        Commands::CreateSuperAdmin { name, email, password } => {
            commands::admin::handle(&name, &email, &password, output_format).await
        }
    }
}
