//! rserve - command-line client for Rserve
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use config::Config;
use rserve_client::Session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rserve")]
#[command(about = "Command-line client for Rserve")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "RSERVE_CONFIG")]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Unix-domain socket path (overrides host and port)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Login user
    #[arg(short, long)]
    user: Option<String>,

    /// Login password (prefer RSERVE_PASSWORD or password_file)
    #[arg(long)]
    password: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Evaluate an R expression and print the result
    Eval {
        /// R expression
        expr: String,
    },

    /// Evaluate an R expression, discarding the result
    VoidEval {
        /// R expression
        expr: String,
    },

    /// Assign a vector to a symbol
    Assign {
        /// Symbol name
        name: String,

        /// Element type
        #[arg(short, long, value_enum, default_value_t = ValueKind::Double)]
        kind: ValueKind,

        /// Elements ("NA" for missing)
        #[arg(required = true, allow_hyphen_values = true)]
        values: Vec<String>,
    },

    /// Detach the session and print what is needed to resume it
    Detach {
        /// Expression to evaluate before detaching
        expr: Option<String>,

        /// Write the session to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resume a detached session
    Resume {
        /// Session file written by `detach`
        session: PathBuf,

        /// Expression to evaluate in the resumed session
        expr: Option<String>,
    },

    /// Download a file from the server
    ReadFile {
        /// File name on the server
        remote: String,

        /// Local destination (stdout if omitted)
        local: Option<PathBuf>,
    },

    /// Upload a file to the server
    WriteFile {
        /// Local source
        local: PathBuf,

        /// File name on the server
        remote: String,
    },

    /// Delete a file on the server
    RemoveFile {
        /// File name on the server
        remote: String,
    },

    /// Shut the server down
    Shutdown {
        /// Shutdown key, if the server requires one
        #[arg(short, long)]
        key: Option<String>,

        /// Use the control channel (Rserve 0.6+)
        #[arg(long)]
        control: bool,
    },

    /// Query the server's custom status command
    Status,
}

/// Element type for `assign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValueKind {
    Int,
    Double,
    String,
}

impl Cli {
    /// Loads the configuration and applies command-line overrides.
    fn load_config(&self) -> Result<Config, config::ConfigError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref socket) = self.socket {
            config.socket = Some(socket.clone());
        }
        if let Some(ref user) = self.user {
            config.user = Some(user.clone());
        }
        if let Some(ref password) = self.password {
            config.password = Some(password.clone());
        }
        config.load_secrets()?;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&config, cli.json)?;
        }
        Some(Commands::Resume { session, expr }) => {
            let text = std::fs::read_to_string(&session)?;
            let session: Session = serde_yaml::from_str(&text)?;
            match commands::resume(&config, &session, expr.as_deref(), cli.json) {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
        Some(cmd) => {
            // Connect for one-shot command
            let mut client = commands::connect(&config).map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            match commands::execute(&mut client, cmd, cli.json) {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }

            client.disconnect();
        }
    }

    Ok(())
}
