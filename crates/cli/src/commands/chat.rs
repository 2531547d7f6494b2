//! `dentcoach chat`: interactive or single-message coaching.

use dentcoach_coach::{Coach, CoachReply, render_plain};
use dentcoach_config::AppConfig;
use dentcoach_core::message::Message;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    // Check for an API key early and give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DENTCOACH_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let store = super::open_store(&config).await?;
    let router = dentcoach_providers::build_from_config(&config);
    let provider = router
        .default_provider()
        .ok_or("No default provider configured")?;
    let coach = Coach::from_config(&config, store.clone(), provider);

    if let Some(msg) = message {
        let reply = coach
            .respond(&[Message::user(msg)])
            .await
            .map_err(|e| format!("{} ({e})", e.public_message()))?;
        print_reply(&reply, json)?;
        return Ok(());
    }

    println!();
    println!("  DentCoach - Interactive Mode");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", coach.model());
    println!("  Knowledge: {} active entries", store.list_active().await?.len());
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        history.push(Message::user(input));
        eprint!("  ...");
        let result = coach.respond(&history).await;
        eprint!("\r     \r");

        match result {
            Ok(reply) => {
                println!();
                print_reply(&reply, json)?;
                println!();
                history.push(Message::assistant(reply.raw));
            }
            Err(e) => {
                // Keep the turn out of history so the user can retry
                history.pop();
                eprintln!("  {}", e.public_message());
                tracing::debug!(error = %e, "Chat turn failed");
            }
        }
        prompt()?;
    }

    println!("\n  Goodbye!");
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    use std::io::Write;
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_reply(reply: &CoachReply, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(&reply.response)?);
    } else {
        println!("{}", render_plain(&reply.response));
    }
    Ok(())
}
