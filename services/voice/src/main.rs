//! Terminal voice client.
//!
//! Starts a realtime voice session against the default microphone and
//! speaker. Typed lines are sent to the agent as text; lines starting with
//! `/` control the session (see `/help`).

use anyhow::Context;
use clap::Parser;
use std::{io::IsTerminal, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use wanda_core::{
    content::HttpContentService,
    gateway::HttpRealtimeGateway,
    session::{SessionDeps, SessionHandle, SessionRuntime},
    settings::SessionSettings,
};
use wanda_voice::{
    commands::{HELP, Input, parse_command},
    config::Config,
    media::{CpalMediaDevices, Speaker},
    render::Renderer,
    transport::WebRtcTransport,
};

/// Talk to the Wanda assistant from the terminal
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Reference document to seed the conversation with
    #[arg(short, long)]
    reference: Option<String>,

    /// List available reference documents and exit
    #[arg(long)]
    list_references: bool,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    // stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    // Without a speaker the session still runs; agent audio is analysed only.
    let speaker = match Speaker::open().await {
        Ok(speaker) => Some(speaker),
        Err(e) => {
            warn!(error = %e, "no speaker available, agent audio will not be played");
            None
        }
    };

    let deps = SessionDeps {
        gateway: Arc::new(HttpRealtimeGateway::new(
            client.clone(),
            config.server_url.clone(),
            config.realtime_base_url.clone(),
            config.realtime_model.clone(),
        )),
        content: Arc::new(HttpContentService::new(client, config.server_url.clone())),
        transport: Arc::new(WebRtcTransport::new(speaker.as_ref().map(Speaker::queue))),
        media: Arc::new(CpalMediaDevices),
    };
    let settings = SessionSettings {
        ice_servers: vec![config.stun_url.clone()],
        ..Default::default()
    };

    let (runtime, handle) = SessionRuntime::new(deps, settings);
    let runtime_task = tokio::spawn(runtime.run());

    if cli.list_references {
        let result = print_references(&handle).await;
        handle.shutdown()?;
        let _ = runtime_task.await;
        return result;
    }

    let renderer_task = tokio::spawn(render_snapshots(handle.clone()));

    info!(server_url = %config.server_url, "starting session");
    match handle.start(cli.reference.clone()).await {
        Ok(()) => {
            if cli.muted {
                handle.set_microphone_muted(true)?;
            }
        }
        Err(e) => eprintln!("failed to start session: {e:#}"),
    }
    println!("type a message, or /help for commands");

    tokio::select! {
        result = read_input(&handle) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
    }

    handle.shutdown()?;
    let _ = runtime_task.await;
    renderer_task.abort();
    drop(speaker);
    Ok(())
}

async fn print_references(handle: &SessionHandle) -> anyhow::Result<()> {
    let references = handle
        .list_references()
        .await
        .context("Failed to list reference documents")?;
    if references.is_empty() {
        println!("no reference documents available");
    }
    for reference in references {
        println!("{reference}");
    }
    Ok(())
}

/// Handles typed lines until `/quit` or end of input.
async fn read_input(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Input::Empty => {}
            Input::Text(text) => handle.send_text(text)?,
            Input::Mute => handle.toggle_microphone()?,
            Input::Stop => handle.stop()?,
            Input::Start(reference) => {
                if let Err(e) = handle.start(reference).await {
                    eprintln!("failed to start session: {e:#}");
                }
            }
            Input::References => {
                if let Err(e) = print_references(handle).await {
                    eprintln!("{e:#}");
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
        }
    }
    Ok(())
}

async fn render_snapshots(handle: SessionHandle) {
    let mut renderer = Renderer::new(std::io::stdout().is_terminal());
    let mut snapshots = handle.subscribe();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        for line in renderer.update(&snapshot) {
            println!("{line}");
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}
