//! Owns the UDP socket, the reliability layer, and the battle engine; routes
//! inbound messages to handlers and exposes the application-facing
//! operations (`connect_as_joiner`, `send_attack`, `send_chat`, ...).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use poke_protocol_core::battle::{BattleEngine, TurnOutcome};
use poke_protocol_core::error::BattleError;
use poke_protocol_core::model::{Combatant, StatBoosts};
use poke_protocol_core::reliability::{ReliabilityLayer, SendCallback};
use poke_protocol_core::wire::Message;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type ChatCallback = Box<dyn Fn(&str, &str) + Send + Sync>;
type BattleUpdateCallback = Box<dyn Fn(&str) + Send + Sync>;
type GameOverCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_chat_received: Option<ChatCallback>,
    on_battle_update: Option<BattleUpdateCallback>,
    on_game_over: Option<GameOverCallback>,
}

struct BattleContext {
    is_host: bool,
    seed: Option<u64>,
    my_combatant: Option<Arc<Combatant>>,
    opponent_combatant: Option<Arc<Combatant>>,
    my_boosts: StatBoosts,
    opponent_boosts: StatBoosts,
    engine: Option<BattleEngine>,
    connected: bool,
}

impl BattleContext {
    fn new(is_host: bool) -> Self {
        Self {
            is_host,
            seed: None,
            my_combatant: None,
            opponent_combatant: None,
            my_boosts: StatBoosts::default(),
            opponent_boosts: StatBoosts::default(),
            engine: None,
            connected: false,
        }
    }

    fn maybe_start_battle(&mut self) -> bool {
        if self.engine.is_some() {
            return false;
        }
        let (Some(seed), Some(my), Some(opp)) =
            (self.seed, self.my_combatant.clone(), self.opponent_combatant.clone())
        else {
            return false;
        };
        let mut engine = BattleEngine::new(seed, self.is_host);
        engine.setup_battle(my, opp, self.my_boosts.clone(), self.opponent_boosts.clone());
        self.engine = Some(engine);
        true
    }
}

struct UdpSender {
    socket: Arc<UdpSocket>,
    remote: StdMutex<Option<SocketAddr>>,
}

#[async_trait]
impl SendCallback for UdpSender {
    async fn send(&self, payload: Vec<u8>) {
        let remote = *self.remote.lock().expect("remote addr mutex poisoned");
        if let Some(addr) = remote {
            if let Err(err) = self.socket.send_to(&payload, addr).await {
                warn!(%err, "transport error sending datagram");
            }
        }
    }
}

pub struct PeerOrchestrator {
    pub name: String,
    pub is_spectator: bool,
    socket: Arc<UdpSocket>,
    sender: Arc<UdpSender>,
    reliability: Arc<ReliabilityLayer<UdpSender>>,
    combatants: Arc<HashMap<String, Combatant>>,
    battle: Mutex<BattleContext>,
    callbacks: StdMutex<Callbacks>,
    running: Arc<AtomicBool>,
}

impl PeerOrchestrator {
    pub async fn bind(
        name: impl Into<String>,
        port: u16,
        is_host: bool,
        is_spectator: bool,
        combatants: Arc<HashMap<String, Combatant>>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind UDP socket on port {port}"))?;
        let socket = Arc::new(socket);
        let sender = Arc::new(UdpSender { socket: socket.clone(), remote: StdMutex::new(None) });
        let reliability = ReliabilityLayer::new(sender.clone());
        Ok(Arc::new(Self {
            name: name.into(),
            is_spectator,
            socket,
            sender,
            reliability,
            combatants,
            battle: Mutex::new(BattleContext::new(is_host)),
            callbacks: StdMutex::new(Callbacks::default()),
            running: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn set_on_chat_received(&self, f: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.callbacks.lock().expect("callbacks mutex poisoned").on_chat_received = Some(Box::new(f));
    }

    pub fn set_on_battle_update(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks.lock().expect("callbacks mutex poisoned").on_battle_update = Some(Box::new(f));
    }

    pub fn set_on_game_over(&self, f: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.callbacks.lock().expect("callbacks mutex poisoned").on_game_over = Some(Box::new(f));
    }

    /// Spawns the receive loop and retry worker. Both tasks observe `stop()`
    /// within one poll interval.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let receive_self = self.clone();
        tokio::spawn(async move { receive_self.receive_loop().await });

        let retry_reliability = self.reliability.clone();
        let retry_running = self.running.clone();
        tokio::spawn(async move { retry_reliability.run_retry_loop(retry_running).await });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True once this peer's handshake has completed (a seed has been
    /// exchanged with the remote side). `send_battle_setup` relies on this:
    /// calling it before the handshake lands would forward a `None` seed to
    /// a joiner, or race the host's own seed roll.
    pub async fn is_connected(&self) -> bool {
        self.battle.lock().await.connected
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = [0u8; 4096];
        while self.running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(std::time::Duration::from_secs(1), self.socket.recv_from(&mut buf)).await;
            let (len, addr) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(err)) => {
                    warn!(%err, "transport error receiving datagram");
                    continue;
                }
                Err(_timeout) => continue,
            };
            let message = match Message::decode(&buf[..len]) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "dropping malformed inbound frame");
                    continue;
                }
            };
            self.handle_message(message, addr).await;
        }
    }

    /// Joiner-side handshake kickoff: latches the host's address and sends
    /// `HANDSHAKE_REQUEST`.
    pub async fn connect_as_joiner(&self, addr: SocketAddr) {
        *self.sender.remote.lock().expect("remote addr mutex poisoned") = Some(addr);
        let seq = self.reliability.next_sequence_number().await;
        let payload = Message::HandshakeRequest { sequence_number: seq }.encode();
        self.reliability.send(payload, Some(seq)).await;
    }

    /// Spectator-side handshake kickoff.
    pub async fn connect_as_spectator(&self, addr: SocketAddr) {
        *self.sender.remote.lock().expect("remote addr mutex poisoned") = Some(addr);
        let seq = self.reliability.next_sequence_number().await;
        let payload = Message::SpectatorRequest { sequence_number: seq }.encode();
        self.reliability.send(payload, Some(seq)).await;
    }

    /// Sends this peer's chosen combatant and initial boosts. The seed
    /// travels along too, but is never rolled here: it was already committed
    /// during the handshake (`handle_handshake_request`/`_response`), and
    /// this just forwards whatever is already on the battle context so both
    /// sides build their `BattleEngine` from the one shared seed.
    pub async fn send_battle_setup(&self, combatant_name: &str) -> Result<()> {
        let combatant = self
            .combatants
            .get(&combatant_name.to_lowercase())
            .ok_or_else(|| BattleError::UnknownCombatant(combatant_name.to_string()))?
            .clone();

        let mut battle = self.battle.lock().await;
        battle.my_combatant = Some(Arc::new(combatant.clone()));

        let seed = battle.seed;
        let my_boosts = battle.my_boosts.clone();
        drop(battle);

        let seq = self.reliability.next_sequence_number().await;
        let payload = Message::BattleSetup {
            sequence_number: seq,
            communication_mode: "P2P".to_string(),
            pokemon_name: combatant_name.to_string(),
            stat_boosts: my_boosts,
            pokemon: combatant,
            seed,
        }
        .encode();
        self.reliability.send(payload, Some(seq)).await;
        Ok(())
    }

    /// Initiates an attack: validates the precondition synchronously,
    /// announces, then immediately computes and reports this peer's own
    /// calculation.
    pub async fn send_attack(&self, move_name: &str) -> Result<()> {
        if self.sender.remote.lock().expect("remote addr mutex poisoned").is_none() {
            return Err(anyhow!("cannot attack: no remote peer connected"));
        }
        let mut battle = self.battle.lock().await;
        let engine = battle.engine.as_mut().ok_or_else(|| anyhow!("battle has not been set up yet"))?;
        if !engine.can_attack() {
            return Err(anyhow!("cannot attack: it is not this peer's turn or a turn is already in progress"));
        }
        // Drawn from the reliability layer's shared counter (not a
        // turn-local counter) so this turn's consecutive N, N+1, N+2 never
        // collide with a chat message or the eventual GAME_OVER this peer
        // sends through that same counter.
        let seq = self.reliability.next_sequence_number().await;
        let seq = engine.announce_attack(move_name, seq).map_err(|e| anyhow!(e.to_string()))?;
        let announce = Message::AttackAnnounce { sequence_number: seq, move_name: move_name.to_string() }.encode();
        self.reliability.send(announce, Some(seq)).await;

        let record = engine.compute_own_calculation(true);
        engine.apply_calculation(record.clone(), true);
        drop(battle);

        let report_seq = seq + 1;
        let report = Message::CalculationReport {
            sequence_number: report_seq,
            attacker: record.attacker,
            move_used: record.move_used,
            remaining_health: record.remaining_health,
            damage_dealt: record.damage_dealt,
            defender_hp_remaining: record.defender_hp_remaining,
            status_message: record.status_message.clone(),
        }
        .encode();
        self.reliability.send(report, Some(report_seq)).await;

        self.fire_battle_update(&record.status_message);
        Ok(())
    }

    pub async fn send_chat(&self, content: ChatOutbound) -> Result<()> {
        if self.sender.remote.lock().expect("remote addr mutex poisoned").is_none() {
            return Err(anyhow!("cannot send chat: no remote peer connected"));
        }
        let seq = self.reliability.next_sequence_number().await;
        let message = match content {
            ChatOutbound::Text(text) => Message::ChatMessage {
                sequence_number: seq,
                sender_name: self.name.clone(),
                content_type: "TEXT".to_string(),
                message_text: Some(text),
                sticker_data: None,
            },
            ChatOutbound::Sticker(data) => Message::ChatMessage {
                sequence_number: seq,
                sender_name: self.name.clone(),
                content_type: "STICKER".to_string(),
                message_text: None,
                sticker_data: Some(data),
            },
        };
        self.reliability.send(message.encode(), Some(seq)).await;
        Ok(())
    }

    fn fire_battle_update(&self, line: &str) {
        if let Some(cb) = &self.callbacks.lock().expect("callbacks mutex poisoned").on_battle_update {
            cb(line);
        }
    }

    fn fire_chat(&self, sender: &str, text: &str) {
        if let Some(cb) = &self.callbacks.lock().expect("callbacks mutex poisoned").on_chat_received {
            cb(sender, text);
        }
    }

    fn fire_game_over(&self, winner: &str, loser: &str) {
        if let Some(cb) = &self.callbacks.lock().expect("callbacks mutex poisoned").on_game_over {
            cb(winner, loser);
        }
    }

    async fn handle_message(self: &Arc<Self>, message: Message, addr: SocketAddr) {
        // Any sequenced inbound frame is always ACKed, including duplicates;
        // a duplicate's payload is never re-processed.
        if let Some(seq) = message.sequence_number() {
            let duplicate = self.reliability.is_duplicate(seq).await;
            let ack = Message::Ack { ack_number: seq }.encode();
            self.sender.send(ack).await;
            if duplicate {
                debug!(seq, "duplicate frame acked, not reprocessed");
                return;
            }
        }

        match message {
            Message::HandshakeRequest { .. } => self.handle_handshake_request(addr).await,
            Message::HandshakeResponse { seed, .. } => self.handle_handshake_response(seed).await,
            Message::SpectatorRequest { .. } => self.handle_spectator_request(addr).await,
            Message::BattleSetup { pokemon_name, stat_boosts, pokemon, seed, .. } => {
                self.handle_battle_setup(pokemon_name, stat_boosts, pokemon, seed).await
            }
            Message::AttackAnnounce { sequence_number, move_name } => {
                self.handle_attack_announce(sequence_number, move_name).await
            }
            Message::DefenseAnnounce { .. } => {}
            Message::CalculationReport {
                attacker, move_used, remaining_health, damage_dealt, defender_hp_remaining, status_message, ..
            } => {
                self.handle_calculation_report(
                    attacker,
                    move_used,
                    remaining_health,
                    damage_dealt,
                    defender_hp_remaining,
                    status_message,
                )
                .await
            }
            Message::CalculationConfirm { .. } => self.handle_calculation_confirm().await,
            Message::ResolutionRequest { attacker, move_used, damage_dealt, defender_hp_remaining, .. } => {
                self.handle_resolution_request(attacker, move_used, damage_dealt, defender_hp_remaining).await
            }
            Message::GameOver { winner, loser, .. } => self.fire_game_over(&winner, &loser),
            Message::ChatMessage { sender_name, content_type, message_text, sticker_data, .. } => {
                let text = if content_type == "STICKER" { sticker_data.unwrap_or_default() } else { message_text.unwrap_or_default() };
                self.fire_chat(&sender_name, &text);
            }
            Message::Ack { ack_number } => self.reliability.handle_ack(ack_number).await,
            Message::HostAnnouncement { .. } | Message::DiscoveryRequest { .. } | Message::DiscoveryResponse { .. } => {
                debug!("discovery/broadcast message received; no application handler wired up");
            }
        }
    }

    async fn handle_handshake_request(&self, addr: SocketAddr) {
        *self.sender.remote.lock().expect("remote addr mutex poisoned") = Some(addr);
        let mut battle = self.battle.lock().await;
        let seed = rand::thread_rng().gen_range(1..=1_000_000);
        battle.seed = Some(seed);
        battle.connected = true;
        drop(battle);

        let seq = self.reliability.next_sequence_number().await;
        let payload = Message::HandshakeResponse { sequence_number: seq, seed }.encode();
        self.reliability.send(payload, Some(seq)).await;
        info!(seed, "handshake complete, responded with seed");
    }

    async fn handle_handshake_response(&self, seed: u64) {
        let mut battle = self.battle.lock().await;
        battle.seed = Some(seed);
        battle.connected = true;
        info!(seed, "handshake complete, seed received");
    }

    /// Answered identically to a joiner's handshake (spec.md §4.6), but only
    /// by the host, and without engaging turn logic on this peer's side.
    async fn handle_spectator_request(&self, addr: SocketAddr) {
        let mut battle = self.battle.lock().await;
        if !battle.is_host {
            return;
        }
        *self.sender.remote.lock().expect("remote addr mutex poisoned") = Some(addr);
        let seed = *battle.seed.get_or_insert_with(|| rand::thread_rng().gen_range(1..=1_000_000));
        drop(battle);

        let seq = self.reliability.next_sequence_number().await;
        let payload = Message::HandshakeResponse { sequence_number: seq, seed }.encode();
        self.reliability.send(payload, Some(seq)).await;
    }

    async fn handle_battle_setup(&self, pokemon_name: String, stat_boosts: StatBoosts, pokemon: Combatant, seed: Option<u64>) {
        if self.is_spectator {
            return;
        }
        let mut battle = self.battle.lock().await;
        battle.opponent_combatant = Some(Arc::new(pokemon));
        battle.opponent_boosts = stat_boosts;
        if let Some(seed) = seed {
            battle.seed.get_or_insert(seed);
        }
        let started = battle.maybe_start_battle();
        drop(battle);

        if started {
            // Boundary between handshake and battle sequence numbering.
            self.reliability.clear_received_sequences().await;
            info!(%pokemon_name, "opponent setup received, battle engine constructed");
        }
    }

    async fn handle_attack_announce(&self, seq: u64, move_name: String) {
        let mut battle = self.battle.lock().await;
        let Some(engine) = battle.engine.as_mut() else { return };
        if let Err(err) = engine.receive_attack_announce(&move_name, seq) {
            warn!(%err, "protocol error handling attack announce");
            return;
        }
        drop(battle);

        let defense = Message::DefenseAnnounce { sequence_number: seq }.encode();
        self.reliability.send(defense, Some(seq)).await;

        let mut battle = self.battle.lock().await;
        let engine = battle.engine.as_mut().expect("engine present");
        let record = engine.compute_own_calculation(false);
        engine.apply_calculation(record.clone(), true);
        drop(battle);

        let report_seq = seq + 1;
        let report = Message::CalculationReport {
            sequence_number: report_seq,
            attacker: record.attacker,
            move_used: record.move_used,
            remaining_health: record.remaining_health,
            damage_dealt: record.damage_dealt,
            defender_hp_remaining: record.defender_hp_remaining,
            status_message: record.status_message.clone(),
        }
        .encode();
        self.reliability.send(report, Some(report_seq)).await;
        self.fire_battle_update(&record.status_message);
    }

    async fn handle_calculation_report(
        &self,
        attacker: String,
        move_used: String,
        remaining_health: i64,
        damage_dealt: i64,
        defender_hp_remaining: i64,
        status_message: String,
    ) {
        use poke_protocol_core::battle::CalculationRecord;
        let record = CalculationRecord { attacker, move_used, remaining_health, damage_dealt, defender_hp_remaining, status_message };

        let mut battle = self.battle.lock().await;
        let Some(engine) = battle.engine.as_mut() else { return };
        engine.apply_calculation(record.clone(), false);
        let matches = engine.calculations_match();
        let seq = engine.current_sequence;

        if matches {
            let outcome = engine.confirm_calculation();
            drop(battle);
            let confirm_seq = seq + 2;
            let payload = Message::CalculationConfirm { sequence_number: confirm_seq }.encode();
            self.reliability.send(payload, Some(confirm_seq)).await;
            self.after_turn_commit(outcome).await;
        } else {
            // This peer detected the mismatch: adopt the opponent's reported
            // values (the incoming record) and propose them as authoritative.
            engine.adopt_incoming(record.clone());
            drop(battle);
            let resolution_seq = seq + 2;
            let payload = Message::ResolutionRequest {
                sequence_number: resolution_seq,
                attacker: record.attacker,
                move_used: record.move_used,
                damage_dealt: record.damage_dealt,
                defender_hp_remaining: record.defender_hp_remaining,
            }
            .encode();
            self.reliability.send(payload, Some(resolution_seq)).await;
        }
    }

    async fn handle_calculation_confirm(&self) {
        let mut battle = self.battle.lock().await;
        let Some(engine) = battle.engine.as_mut() else { return };
        if !engine.calculations_match() {
            return;
        }
        let outcome = engine.confirm_calculation();
        drop(battle);
        self.after_turn_commit(outcome).await;
    }

    async fn handle_resolution_request(&self, attacker: String, move_used: String, damage_dealt: i64, defender_hp_remaining: i64) {
        use poke_protocol_core::battle::CalculationRecord;
        // remaining_health is not part of the equality contract and is not
        // carried on RESOLUTION_REQUEST; a placeholder is fine here since it
        // is never compared.
        let record = CalculationRecord {
            attacker,
            move_used,
            remaining_health: 0,
            damage_dealt,
            defender_hp_remaining,
            status_message: String::new(),
        };

        let mut battle = self.battle.lock().await;
        let Some(engine) = battle.engine.as_mut() else { return };
        engine.adopt_incoming(record);
        let outcome = engine.confirm_calculation();
        drop(battle);
        self.after_turn_commit(outcome).await;
    }

    async fn after_turn_commit(&self, outcome: Result<TurnOutcome, poke_protocol_core::error::BattleError>) {
        let Ok(outcome) = outcome else { return };
        if let TurnOutcome::GameOver { winner, loser } = outcome {
            let seq = self.reliability.next_sequence_number().await;
            let payload = Message::GameOver { sequence_number: seq, winner: winner.clone(), loser: loser.clone() }.encode();
            self.reliability.send(payload, Some(seq)).await;
            self.fire_game_over(&winner, &loser);
        }
    }
}

pub enum ChatOutbound {
    Text(String),
    Sticker(String),
}
