//! Interactive REPL.

use crate::{commands, Commands};
use clap::Parser;
use colored::Colorize;
use crdtkv_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Available commands:
  help                                   Show this help
  ping                                   Ping a node
  info                                   Get server info
  pool                                   Show connection pool usage

  fetch <type> <bucket> <key>            Fetch a data type
  incr <type> <bucket> <key> [delta]     Increment a counter
  set-add <type> <bucket> <key> <item>...      Add set members
  set-remove <type> <bucket> <key> <item>...   Remove set members
  hll-add <type> <bucket> <key> <item>...      Add HyperLogLog elements

  map-incr <type> <bucket> <key> <path> [delta]        Increment a map counter
  map-register <type> <bucket> <key> <path> <value>    Assign a map register
  map-flag <type> <bucket> <key> <path> <true|false>   Set a map flag
  map-set-add <type> <bucket> <key> <path> <item>...   Add to a map set
  map-remove <type> <bucket> <key> <path> <kind>       Remove a map field

  quit, exit                             Exit the REPL
"#;

/// A single REPL line, parsed with the same grammar as the command line.
#[derive(Parser)]
#[command(no_binary_name = true, disable_help_subcommand = true)]
struct Line {
    #[command(subcommand)]
    command: Commands,
}

pub fn run(client: Client, nodes: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "crdtkv CLI".bold().cyan());
    println!("Nodes: {}", nodes);

    // Fail fast when no node answers
    client.ping()?;
    println!("{}", "Connected!".green());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".crdtkv_history"))
        .unwrap_or_else(|_| ".crdtkv_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "crdtkv>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
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

    let _ = rl.save_history(&history_path);

    client.close();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Runs one line; `None` means the user asked to leave.
fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match line.to_lowercase().as_str() {
        "help" | "?" => return Ok(Some(HELP_TEXT.to_string())),
        "quit" | "exit" | "q" => return Ok(None),
        "pool" => {
            let stats = client.pool_stats();
            return Ok(Some(format!(
                "  Idle: {}\n  In use: {}",
                stats.idle, stats.on_loan
            )));
        }
        _ => {}
    }

    let parsed = match Line::try_parse_from(line.split_whitespace()) {
        Ok(parsed) => parsed,
        // Usage errors are shown, not raised.
        Err(e) => return Ok(Some(e.to_string())),
    };
    commands::execute(client, parsed.command).map(Some)
}
