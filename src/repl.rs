//! Interactive REPL.

use crate::commands::{self, format_rexp, format_session};
use crate::config::Config;
use colored::Colorize;
use rserve_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config as EditorConfig, Editor};

const HELP_TEXT: &str = r#"
Any line not starting with ':' is evaluated as R and the result printed.

Available commands:
  :help                   Show this help
  :void <expr>            Evaluate without printing the result
  :json                   Toggle JSON output
  :status                 Query the server's custom status
  :detach [expr]          Detach the session and print how to resume it
  :quit, :exit            Exit the REPL
"#;

/// What a line asks the REPL loop to do next.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Print(String),
    Quit,
}

pub fn run(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "rserve REPL".bold().cyan());
    println!("Connecting to {}...", config.connection_config().endpoint);

    let mut client = commands::connect(config)?;
    println!("{}", "Connected!".green());

    // Create readline editor
    let editor_config = EditorConfig::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(editor_config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".rserve_history"))
        .unwrap_or_else(|_| ".rserve_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type ':help' for available commands.\n");

    let mut json = json;
    loop {
        let prompt = format!("{} ", "R>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_line(&mut client, line, &mut json) {
                    Ok(Outcome::Print(output)) if output.is_empty() => {}
                    Ok(Outcome::Print(output)) => println!("{}\n", output),
                    Ok(Outcome::Quit) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
                if !client.is_connected() {
                    println!("{}", "Connection closed.".yellow());
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    client.disconnect();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn execute_line(
    client: &mut Client,
    line: &str,
    json: &mut bool,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let Some(command) = line.strip_prefix(':') else {
        let value = client.eval(line)?;
        return Ok(Outcome::Print(format_rexp(&value, *json)));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name.to_lowercase().as_str() {
        "help" | "h" | "?" => Ok(Outcome::Print(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(Outcome::Quit),

        "json" => {
            *json = !*json;
            Ok(Outcome::Print(format!(
                "JSON output {}",
                if *json { "on" } else { "off" }
            )))
        }

        "void" | "v" => {
            if rest.is_empty() {
                return Ok(Outcome::Print("Usage: :void <expr>".to_string()));
            }
            client.void_eval(rest)?;
            Ok(Outcome::Print(String::new()))
        }

        "status" => {
            let ok = client.query_custom_status()?;
            Ok(Outcome::Print(if ok {
                "OK".green().to_string()
            } else {
                "NOT OK".red().to_string()
            }))
        }

        "detach" => {
            let expr = (!rest.is_empty()).then_some(rest);
            let session = client.detached_eval(expr)?;
            let text = format_session(&session, *json)?;
            client.disconnect();
            Ok(Outcome::Print(format!(
                "{}\n{}",
                "Session detached; save this to resume it:".green(),
                text
            )))
        }

        _ => Ok(Outcome::Print(format!(
            "Unknown command: :{}. Type ':help' for help.",
            name
        ))),
    }
}
