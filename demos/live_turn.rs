//! Runs one turn against a live OpenAI-compatible server.
//!
//! ```bash
//! STREAMCHAT_MODEL=qwen3:8b RUST_LOG=streamchat=debug \
//!     cargo run --example live_turn -- ollama "What is 17 * 23?"
//! ```
//!
//! The first argument picks a provider preset; `STREAMCHAT_BASE_URL` overrides
//! it. Events are printed as they arrive through a lifecycle sink.

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use streamchat::{
    Client, LifecycleEvent, MemoryStore, Notifier, Provider, RegisterOptions, TurnStatus,
    builder_from_env, client_registry, tool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let provider: Provider = args
        .next()
        .unwrap_or_else(|| "lmstudio".to_string())
        .parse()?;
    let prompt = args
        .next()
        .unwrap_or_else(|| "What is 17 * 23? Use the calculator.".to_string());

    client_registry().register_tool(
        tool("multiply", "Multiply two numbers")
            .param("a", "number")
            .param("b", "number")
            .build(|args| async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!({ "result": a * b }))
            }),
        RegisterOptions::default().timeout_ms(2_000),
    )?;

    let notifier = Notifier::new().on_event(|event: &LifecycleEvent| match event {
        LifecycleEvent::ToolInvoked { name, success, .. } => {
            eprintln!("[tool] {} -> {}", name, if *success { "ok" } else { "failed" })
        }
        LifecycleEvent::Error { message, .. } => eprintln!("[error] {}", message),
        _ => {}
    });

    let options = builder_from_env(Some(provider))
        .context("set STREAMCHAT_MODEL (and STREAMCHAT_API_KEY for hosted providers)")?
        .system_prompt("You are a precise assistant. Use tools for arithmetic.")
        .notifier(notifier)
        .build()?;

    let store = Arc::new(MemoryStore::new());
    let mut client = Client::new(options)?.with_store(store.clone());

    let interrupt = client.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = client.turn(&prompt).await?;
    if !outcome.reasoning.is_empty() {
        println!("--- reasoning ---\n{}\n", outcome.reasoning);
    }
    println!("{}", outcome.text);
    for image in &outcome.images {
        println!("[image] {}", image.url);
    }

    match outcome.status {
        TurnStatus::Complete => Ok(()),
        TurnStatus::Cancelled => {
            eprintln!("interrupted");
            Ok(())
        }
        TurnStatus::Errored => Err(outcome
            .error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow::anyhow!("turn failed"))),
    }
}
