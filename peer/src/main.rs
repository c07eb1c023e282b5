mod data;
mod orchestrator;

use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use clap::Parser;
use orchestrator::{ChatOutbound, PeerOrchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A PokeProtocol duel peer: host a battle, join one, or watch as a spectator.
#[derive(Parser, Debug)]
#[command(name = "poke-peer")]
struct Cli {
    /// Display name for this peer.
    #[arg(long)]
    name: String,

    /// UDP port to bind.
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Run as the host (waits for a joiner instead of connecting out).
    #[arg(long)]
    host: bool,

    /// Connect to a host at HOST:PORT as a joiner.
    #[arg(long, value_name = "HOST:PORT")]
    connect: Option<SocketAddr>,

    /// Connect as a read-only spectator instead of a battling joiner.
    #[arg(long)]
    spectator: bool,

    /// Combatant name to send in BATTLE_SETUP once connected.
    #[arg(long)]
    combatant: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    verbose: bool,

    /// Path to the combatant database JSON file.
    #[arg(long, default_value = "peer/data/combatants.json")]
    combatants_path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "poke_peer=debug,poke_protocol_core=debug" } else { "poke_peer=info,poke_protocol_core=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !cli.host && cli.connect.is_none() && !cli.spectator {
        return Err(anyhow!("pass --host to wait for a joiner, or --connect HOST:PORT to join/spectate"));
    }

    tracing::info!(path = %cli.combatants_path, "loading combatant database");
    let combatants = data::load_combatants(&cli.combatants_path)?;
    tracing::info!(count = combatants.len(), "combatant database loaded");

    let orchestrator = PeerOrchestrator::bind(cli.name.clone(), cli.port, cli.host, cli.spectator, combatants).await?;

    orchestrator.set_on_chat_received(|sender, text| println!("[chat] {sender}: {text}"));
    orchestrator.set_on_battle_update(|line| println!("[battle] {line}"));
    orchestrator.set_on_game_over(|winner, loser| println!("[battle] {winner} defeated {loser}! Game over."));

    orchestrator.start();

    if let Some(addr) = cli.connect {
        if cli.spectator {
            orchestrator.connect_as_spectator(addr).await;
        } else {
            orchestrator.connect_as_joiner(addr).await;
        }
    } else {
        tracing::info!(port = cli.port, "waiting for a joiner to connect");
    }

    if let Some(combatant) = &cli.combatant {
        // Wait for the handshake (seed exchange) before announcing setup;
        // for a hosting peer this also means waiting for a joiner to show up.
        while !orchestrator.is_connected().await {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        orchestrator.send_battle_setup(combatant).await?;
    }

    run_command_loop(&orchestrator).await
}

/// A minimal `attack <move>` / `chat <message>` / `quit` command loop. Not
/// the interactive menu front-end; just enough to exercise the peer's
/// public operations from a terminal.
async fn run_command_loop(orchestrator: &std::sync::Arc<PeerOrchestrator>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.trim().splitn(2, ' ');
        match parts.next().unwrap_or_default() {
            "attack" => {
                let move_name = parts.next().unwrap_or_default();
                if let Err(err) = orchestrator.send_attack(move_name).await {
                    println!("cannot attack: {err}");
                }
            }
            "chat" => {
                let text = parts.next().unwrap_or_default().to_string();
                if let Err(err) = orchestrator.send_chat(ChatOutbound::Text(text)).await {
                    println!("cannot send chat: {err}");
                }
            }
            "quit" | "exit" => {
                orchestrator.stop();
                break;
            }
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }
    Ok(())
}
