//! Text-frame wire codec: newline-terminated `key: value` lines, one frame
//! per UDP datagram, with nested structured values embedded as single-line
//! JSON. See the message-kind table for the field set each `Message` variant
//! carries.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::WireError;
use crate::model::{Combatant, StatBoosts};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HandshakeRequest { sequence_number: u64 },
    HandshakeResponse { sequence_number: u64, seed: u64 },
    SpectatorRequest { sequence_number: u64 },
    BattleSetup {
        sequence_number: u64,
        communication_mode: String,
        pokemon_name: String,
        stat_boosts: StatBoosts,
        pokemon: Combatant,
        seed: Option<u64>,
    },
    AttackAnnounce { sequence_number: u64, move_name: String },
    DefenseAnnounce { sequence_number: u64 },
    CalculationReport {
        sequence_number: u64,
        attacker: String,
        move_used: String,
        remaining_health: i64,
        damage_dealt: i64,
        defender_hp_remaining: i64,
        status_message: String,
    },
    CalculationConfirm { sequence_number: u64 },
    ResolutionRequest {
        sequence_number: u64,
        attacker: String,
        move_used: String,
        damage_dealt: i64,
        defender_hp_remaining: i64,
    },
    GameOver { sequence_number: u64, winner: String, loser: String },
    ChatMessage {
        sequence_number: u64,
        sender_name: String,
        content_type: String,
        message_text: Option<String>,
        sticker_data: Option<String>,
    },
    Ack { ack_number: u64 },
    HostAnnouncement { host_name: String, port: u16, pokemon_name: Option<String> },
    DiscoveryRequest { joiner_name: String },
    DiscoveryResponse { host_name: String, port: u16, pokemon_name: Option<String> },
}

impl Message {
    /// The `message_type` value this variant serializes under.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeRequest { .. } => "HANDSHAKE_REQUEST",
            Self::HandshakeResponse { .. } => "HANDSHAKE_RESPONSE",
            Self::SpectatorRequest { .. } => "SPECTATOR_REQUEST",
            Self::BattleSetup { .. } => "BATTLE_SETUP",
            Self::AttackAnnounce { .. } => "ATTACK_ANNOUNCE",
            Self::DefenseAnnounce { .. } => "DEFENSE_ANNOUNCE",
            Self::CalculationReport { .. } => "CALCULATION_REPORT",
            Self::CalculationConfirm { .. } => "CALCULATION_CONFIRM",
            Self::ResolutionRequest { .. } => "RESOLUTION_REQUEST",
            Self::GameOver { .. } => "GAME_OVER",
            Self::ChatMessage { .. } => "CHAT_MESSAGE",
            Self::Ack { .. } => "ACK",
            Self::HostAnnouncement { .. } => "HOST_ANNOUNCEMENT",
            Self::DiscoveryRequest { .. } => "DISCOVERY_REQUEST",
            Self::DiscoveryResponse { .. } => "DISCOVERY_RESPONSE",
        }
    }

    /// Every non-ACK frame carries a `sequence_number`; ACK frames carry
    /// `ack_number` instead and have no sequence number of their own.
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Self::HandshakeRequest { sequence_number }
            | Self::HandshakeResponse { sequence_number, .. }
            | Self::SpectatorRequest { sequence_number }
            | Self::BattleSetup { sequence_number, .. }
            | Self::AttackAnnounce { sequence_number, .. }
            | Self::DefenseAnnounce { sequence_number }
            | Self::CalculationReport { sequence_number, .. }
            | Self::CalculationConfirm { sequence_number }
            | Self::ResolutionRequest { sequence_number, .. }
            | Self::GameOver { sequence_number, .. }
            | Self::ChatMessage { sequence_number, .. } => Some(*sequence_number),
            Self::Ack { .. }
            | Self::HostAnnouncement { .. }
            | Self::DiscoveryRequest { .. }
            | Self::DiscoveryResponse { .. } => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut lines = vec![format!("message_type: {}", self.kind())];
        if let Some(seq) = self.sequence_number() {
            lines.push(format!("sequence_number: {seq}"));
        }
        match self {
            Self::HandshakeRequest { .. } | Self::SpectatorRequest { .. } => {}
            Self::HandshakeResponse { seed, .. } => lines.push(format!("seed: {seed}")),
            Self::BattleSetup { communication_mode, pokemon_name, stat_boosts, pokemon, seed, .. } => {
                lines.push(format!("communication_mode: {communication_mode}"));
                lines.push(format!("pokemon_name: {pokemon_name}"));
                lines.push(format!(
                    "stat_boosts: {}",
                    serde_json::to_string(stat_boosts).expect("StatBoosts always serializes")
                ));
                lines.push(format!(
                    "pokemon: {}",
                    serde_json::to_string(pokemon).expect("Combatant always serializes")
                ));
                if let Some(seed) = seed {
                    lines.push(format!("seed: {seed}"));
                }
            }
            Self::AttackAnnounce { move_name, .. } => lines.push(format!("move_name: {move_name}")),
            Self::DefenseAnnounce { .. } => {}
            Self::CalculationReport {
                attacker,
                move_used,
                remaining_health,
                damage_dealt,
                defender_hp_remaining,
                status_message,
                ..
            } => {
                lines.push(format!("attacker: {attacker}"));
                lines.push(format!("move_used: {move_used}"));
                lines.push(format!("remaining_health: {remaining_health}"));
                lines.push(format!("damage_dealt: {damage_dealt}"));
                lines.push(format!("defender_hp_remaining: {defender_hp_remaining}"));
                lines.push(format!("status_message: {status_message}"));
            }
            Self::CalculationConfirm { .. } => {}
            Self::ResolutionRequest { attacker, move_used, damage_dealt, defender_hp_remaining, .. } => {
                lines.push(format!("attacker: {attacker}"));
                lines.push(format!("move_used: {move_used}"));
                lines.push(format!("damage_dealt: {damage_dealt}"));
                lines.push(format!("defender_hp_remaining: {defender_hp_remaining}"));
            }
            Self::GameOver { winner, loser, .. } => {
                lines.push(format!("winner: {winner}"));
                lines.push(format!("loser: {loser}"));
            }
            Self::ChatMessage { sender_name, content_type, message_text, sticker_data, .. } => {
                lines.push(format!("sender_name: {sender_name}"));
                lines.push(format!("content_type: {content_type}"));
                if content_type == "TEXT" {
                    if let Some(text) = message_text {
                        lines.push(format!("message_text: {text}"));
                    }
                } else if content_type == "STICKER" {
                    if let Some(data) = sticker_data {
                        lines.push(format!("sticker_data: {data}"));
                    }
                }
            }
            Self::Ack { ack_number } => {
                lines.clear();
                lines.push("message_type: ACK".to_string());
                lines.push(format!("ack_number: {ack_number}"));
            }
            Self::HostAnnouncement { host_name, port, pokemon_name } => {
                lines.push(format!("host_name: {host_name}"));
                lines.push(format!("port: {port}"));
                if let Some(name) = pokemon_name {
                    lines.push(format!("pokemon_name: {name}"));
                }
            }
            Self::DiscoveryRequest { joiner_name } => {
                lines.push(format!("joiner_name: {joiner_name}"));
            }
            Self::DiscoveryResponse { host_name, port, pokemon_name } => {
                lines.push(format!("host_name: {host_name}"));
                lines.push(format!("port: {port}"));
                if let Some(name) = pokemon_name {
                    lines.push(format!("pokemon_name: {name}"));
                }
            }
        }
        let mut body = lines.join("\n");
        body.push('\n');
        body.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let text = String::from_utf8_lossy(data);
        let mut fields: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| WireError::Malformed(line.to_string()))?;
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }

        let kind = fields
            .get("message_type")
            .ok_or(WireError::MissingMessageType)?
            .clone();

        let seq = |fields: &HashMap<String, String>, kind: &'static str| -> Result<u64, WireError> {
            field(fields, kind, "sequence_number")?
                .parse()
                .map_err(|_| WireError::InvalidField {
                    field: "sequence_number",
                    expected: "u64",
                    value: fields.get("sequence_number").cloned().unwrap_or_default(),
                })
        };

        match kind.as_str() {
            "HANDSHAKE_REQUEST" => Ok(Self::HandshakeRequest { sequence_number: seq(&fields, "HANDSHAKE_REQUEST")? }),
            "HANDSHAKE_RESPONSE" => {
                let sequence_number = seq(&fields, "HANDSHAKE_RESPONSE")?;
                let seed = parse_u64(&fields, "HANDSHAKE_RESPONSE", "seed")?;
                Ok(Self::HandshakeResponse { sequence_number, seed })
            }
            "SPECTATOR_REQUEST" => Ok(Self::SpectatorRequest { sequence_number: seq(&fields, "SPECTATOR_REQUEST")? }),
            "BATTLE_SETUP" => {
                let sequence_number = seq(&fields, "BATTLE_SETUP")?;
                let communication_mode = field(&fields, "BATTLE_SETUP", "communication_mode")?.to_string();
                let pokemon_name = field(&fields, "BATTLE_SETUP", "pokemon_name")?.to_string();
                let stat_boosts: StatBoosts = parse_json(&fields, "stat_boosts")?;
                let pokemon: Combatant = parse_json(&fields, "pokemon")?;
                let seed = match fields.get("seed") {
                    Some(s) => Some(s.parse().map_err(|_| WireError::InvalidField {
                        field: "seed",
                        expected: "u64",
                        value: s.clone(),
                    })?),
                    None => None,
                };
                Ok(Self::BattleSetup { sequence_number, communication_mode, pokemon_name, stat_boosts, pokemon, seed })
            }
            "ATTACK_ANNOUNCE" => {
                let sequence_number = seq(&fields, "ATTACK_ANNOUNCE")?;
                let move_name = field(&fields, "ATTACK_ANNOUNCE", "move_name")?.to_string();
                Ok(Self::AttackAnnounce { sequence_number, move_name })
            }
            "DEFENSE_ANNOUNCE" => Ok(Self::DefenseAnnounce { sequence_number: seq(&fields, "DEFENSE_ANNOUNCE")? }),
            "CALCULATION_REPORT" => {
                let sequence_number = seq(&fields, "CALCULATION_REPORT")?;
                Ok(Self::CalculationReport {
                    sequence_number,
                    attacker: field(&fields, "CALCULATION_REPORT", "attacker")?.to_string(),
                    move_used: field(&fields, "CALCULATION_REPORT", "move_used")?.to_string(),
                    remaining_health: parse_i64(&fields, "CALCULATION_REPORT", "remaining_health")?,
                    damage_dealt: parse_i64(&fields, "CALCULATION_REPORT", "damage_dealt")?,
                    defender_hp_remaining: parse_i64(&fields, "CALCULATION_REPORT", "defender_hp_remaining")?,
                    status_message: field(&fields, "CALCULATION_REPORT", "status_message")?.to_string(),
                })
            }
            "CALCULATION_CONFIRM" => Ok(Self::CalculationConfirm { sequence_number: seq(&fields, "CALCULATION_CONFIRM")? }),
            "RESOLUTION_REQUEST" => {
                let sequence_number = seq(&fields, "RESOLUTION_REQUEST")?;
                Ok(Self::ResolutionRequest {
                    sequence_number,
                    attacker: field(&fields, "RESOLUTION_REQUEST", "attacker")?.to_string(),
                    move_used: field(&fields, "RESOLUTION_REQUEST", "move_used")?.to_string(),
                    damage_dealt: parse_i64(&fields, "RESOLUTION_REQUEST", "damage_dealt")?,
                    defender_hp_remaining: parse_i64(&fields, "RESOLUTION_REQUEST", "defender_hp_remaining")?,
                })
            }
            "GAME_OVER" => {
                let sequence_number = seq(&fields, "GAME_OVER")?;
                Ok(Self::GameOver {
                    sequence_number,
                    winner: field(&fields, "GAME_OVER", "winner")?.to_string(),
                    loser: field(&fields, "GAME_OVER", "loser")?.to_string(),
                })
            }
            "CHAT_MESSAGE" => {
                let sequence_number = seq(&fields, "CHAT_MESSAGE")?;
                Ok(Self::ChatMessage {
                    sequence_number,
                    sender_name: field(&fields, "CHAT_MESSAGE", "sender_name")?.to_string(),
                    content_type: field(&fields, "CHAT_MESSAGE", "content_type")?.to_string(),
                    message_text: fields.get("message_text").cloned(),
                    sticker_data: fields.get("sticker_data").cloned(),
                })
            }
            "ACK" => {
                let ack_number = field(&fields, "ACK", "ack_number")?
                    .parse()
                    .map_err(|_| WireError::InvalidField {
                        field: "ack_number",
                        expected: "u64",
                        value: fields.get("ack_number").cloned().unwrap_or_default(),
                    })?;
                Ok(Self::Ack { ack_number })
            }
            "HOST_ANNOUNCEMENT" => Ok(Self::HostAnnouncement {
                host_name: field(&fields, "HOST_ANNOUNCEMENT", "host_name")?.to_string(),
                port: parse_u16(&fields, "HOST_ANNOUNCEMENT", "port")?,
                pokemon_name: fields.get("pokemon_name").cloned(),
            }),
            "DISCOVERY_REQUEST" => Ok(Self::DiscoveryRequest {
                joiner_name: field(&fields, "DISCOVERY_REQUEST", "joiner_name")?.to_string(),
            }),
            "DISCOVERY_RESPONSE" => Ok(Self::DiscoveryResponse {
                host_name: field(&fields, "DISCOVERY_RESPONSE", "host_name")?.to_string(),
                port: parse_u16(&fields, "DISCOVERY_RESPONSE", "port")?,
                pokemon_name: fields.get("pokemon_name").cloned(),
            }),
            other => Err(WireError::UnknownMessageKind(other.to_string())),
        }
    }
}

fn field<'a>(fields: &'a HashMap<String, String>, kind: &'static str, name: &'static str) -> Result<&'a str, WireError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(WireError::MissingField { kind, field: name })
}

fn parse_u64(fields: &HashMap<String, String>, kind: &'static str, name: &'static str) -> Result<u64, WireError> {
    field(fields, kind, name)?
        .parse()
        .map_err(|_| WireError::InvalidField { field: name, expected: "u64", value: fields[name].clone() })
}

fn parse_u16(fields: &HashMap<String, String>, kind: &'static str, name: &'static str) -> Result<u16, WireError> {
    field(fields, kind, name)?
        .parse()
        .map_err(|_| WireError::InvalidField { field: name, expected: "u16", value: fields[name].clone() })
}

fn parse_i64(fields: &HashMap<String, String>, kind: &'static str, name: &'static str) -> Result<i64, WireError> {
    field(fields, kind, name)?
        .parse()
        .map_err(|_| WireError::InvalidField { field: name, expected: "i64", value: fields[name].clone() })
}

fn parse_json<T: for<'de> Deserialize<'de>>(fields: &HashMap<String, String>, name: &'static str) -> Result<T, WireError> {
    let raw = fields
        .get(name)
        .ok_or(WireError::MissingField { kind: "BATTLE_SETUP", field: name })?;
    serde_json::from_str(raw).map_err(|source| WireError::InvalidJson { field: name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample_combatant() -> Combatant {
        Combatant {
            name: "Pikachu".into(),
            pokedex_number: 25,
            hp: 35,
            attack: 55,
            defense: 40,
            special_attack: 50,
            special_defense: 50,
            speed: 90,
            type1: crate::model::PokemonType::Electric,
            type2: None,
            against: Map::new(),
        }
    }

    #[test]
    fn round_trips_handshake_request() {
        let msg = Message::HandshakeRequest { sequence_number: 1 };
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trips_battle_setup_with_nested_json() {
        let msg = Message::BattleSetup {
            sequence_number: 1,
            communication_mode: "P2P".into(),
            pokemon_name: "Pikachu".into(),
            stat_boosts: StatBoosts::default(),
            pokemon: sample_combatant(),
            seed: Some(424242),
        };
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn ack_has_no_sequence_number_field() {
        let encoded = Message::Ack { ack_number: 7 }.encode();
        let text = String::from_utf8(encoded).unwrap();
        assert!(!text.contains("sequence_number"));
        assert!(text.contains("ack_number: 7"));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = Message::decode(b"not a valid line\n").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = Message::decode(b"message_type: NONSENSE\n").unwrap_err();
        assert!(matches!(err, WireError::UnknownMessageKind(_)));
    }
}
