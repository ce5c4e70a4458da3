use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cv_domain::config::Config;
use cv_engine::ChatEngine;

#[derive(Parser)]
#[command(name = "converse", version, about = "Conversational engine CLI")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat REPL.
    Chat {
        /// User id the conversation runs under.
        #[arg(long, default_value_t = 1)]
        user: i64,
    },
    /// Send a single message and print the reply.
    Run {
        #[arg(long, default_value_t = 1)]
        user: i64,
        message: String,
        /// Print the reply as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Probe every configured provider and report availability.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Chat { user } => chat(&config, user).await,
        Command::Run { user, message, json } => run_once(&config, user, &message, json).await,
        Command::Health => health(&config).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        anyhow::bail!(
            "no configuration at {} (pass --config or create config.toml)",
            path.display()
        );
    }
}

async fn run_once(config: &Config, user: i64, message: &str, json: bool) -> anyhow::Result<()> {
    let engine = ChatEngine::open(config).await?;
    let reply = engine.handle_message(user, message).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "text": reply.text,
                "provider": reply.provider,
                "model": reply.model,
                "tokens_used": reply.tokens_used,
                "latency_seconds": reply.latency_seconds,
                "cached": reply.cached,
            })
        );
    } else {
        println!("{}", reply.text);
    }

    engine.close().await?;
    Ok(())
}

async fn health(config: &Config) -> anyhow::Result<()> {
    let engine = ChatEngine::open(config).await?;
    // BTreeMap for stable output order.
    let verdicts: BTreeMap<String, bool> = engine.health().await.into_iter().collect();

    let mut all_ok = true;
    for (provider, ok) in &verdicts {
        println!("{provider}: {}", if *ok { "available" } else { "unavailable" });
        all_ok &= ok;
    }
    engine.close().await?;

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn chat(config: &Config, mut user: i64) -> anyhow::Result<()> {
    let engine = ChatEngine::open(config).await?;

    let mut rl = rustyline::DefaultEditor::new()?;
    eprintln!("converse interactive chat (user {user})");
    eprintln!("Type /help for commands, Ctrl+D to exit");
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &mut user) {
                        break;
                    }
                    continue;
                }

                match engine.handle_message(user, trimmed).await {
                    Ok(reply) => {
                        let tag = match (&reply.provider, reply.cached) {
                            (Some(p), true) => format!(" [{p}, cached]"),
                            (Some(p), false) => format!(" [{p}]"),
                            (None, _) => String::new(),
                        };
                        println!("bot>{tag} {}", reply.text);
                    }
                    Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    engine.close().await?;
    eprintln!("Goodbye!");
    Ok(())
}

/// Process a slash command. Returns `true` if the REPL should exit.
fn handle_slash_command(input: &str, user: &mut i64) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,

        "/user" => match arg.and_then(|s| s.parse::<i64>().ok()) {
            Some(id) => {
                *user = id;
                eprintln!("Now chatting as user {id}");
            }
            None => {
                eprintln!("Current user: {user}");
                eprintln!("Usage: /user <id>");
            }
        },

        "/clear" => {
            eprint!("\x1B[2J\x1B[1;1H");
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /user <id>    Switch to another user id");
            eprintln!("  /clear        Clear the screen");
            eprintln!("  /exit, /quit  Exit the chat");
            eprintln!("  /help         Show this help");
        }

        other => eprintln!("Unknown command: {other} (try /help)"),
    }
    false
}
