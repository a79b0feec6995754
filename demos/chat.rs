//! Terminal chat client.
//!
//! Demonstrates:
//! - Deferring setup until the connection is ready
//! - Standing subscriptions for presence and chat messages
//! - Publishing stdin lines as `chat/new_message`
//! - A correlated request (`/ping`)
//! - Surfacing connection loss
//!
//! Usage:
//!   cargo run --example chat -- --url http://localhost:8888/
//!   cargo run --example chat -- --url http://localhost:8888/ --debug

// ============================================================================
// Imports
// ============================================================================

use anyhow::{Context, bail};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use meteor_client::{ClientConfig, Meteor, PublishOptions};

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    url: String,
    debug: bool,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> anyhow::Result<Self> {
        let mut url = None;
        let mut debug = false;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--url" => url = args.next(),
                "--debug" => debug = true,
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(Self {
            url: url.unwrap_or_else(|| "http://localhost:8888/".to_string()),
            debug,
        })
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "meteor_client=debug"
    } else {
        "meteor_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

fn print_system(msg: &str) {
    println!("* {msg}");
}

fn user_of(data: &Value) -> &str {
    data.get("user").and_then(Value::as_str).unwrap_or("?")
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            std::process::exit(2);
        }
    };
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ClientConfig::builder()
        .page_url(&args.url)
        .build()
        .context("invalid client configuration")?;
    let meteor = Meteor::connect(config).context("failed to start client")?;

    // ========================================================================
    // Subscriptions
    // ========================================================================

    let handle = meteor.clone();
    meteor.on_ready(move || {
        handle.subscribe("user_enter", |data| {
            print_system(&format!("User \"{}\" joined the chat", user_of(&data)));
        });
        handle.subscribe("user_leave", |data| {
            print_system(&format!("User \"{}\" left the chat", user_of(&data)));
        });
        handle.subscribe("chat/new_message", |data| {
            let msg = data.get("msg").and_then(Value::as_str).unwrap_or_default();
            match data.get("user").and_then(Value::as_str) {
                Some(user) => println!("[{user}]: {msg}"),
                None => print_system(msg),
            }
        });
    });

    meteor.on_lost(|reason| {
        print_system(&format!("Connection lost: {reason}"));
    });

    meteor
        .wait_ready()
        .await
        .with_context(|| format!("could not connect to {}", args.url))?;
    print_system("Connected. Type a message and press Enter; /ping, /quit.");

    // ========================================================================
    // Input Loop
    // ========================================================================

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let closed = meteor.wait_closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let line = line.trim();

                match line {
                    "" => {}
                    "/quit" => break,
                    "/ping" => match meteor.request("chat/ping", json!({})).await {
                        Ok(reply) => print_system(&format!("pong: {reply}")),
                        Err(e) => print_system(&format!("ping failed: {e}")),
                    },
                    msg => {
                        meteor.publish(
                            PublishOptions::new("chat/new_message").data(json!({ "msg": msg })),
                        )?;
                    }
                }
            }

            _ = &mut closed => {
                bail!("server closed the connection");
            }
        }
    }

    meteor.shutdown();
    Ok(())
}
