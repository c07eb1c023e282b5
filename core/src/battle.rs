//! The lockstep turn state machine: four battle states, a four-message turn
//! protocol, and calculation-mismatch resolution by the "accept incoming"
//! rule.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::damage::{apply_damage, calculate_damage, seeded_rng};
use crate::error::BattleError;
use crate::model::{move_table, Combatant, MoveData, StatBoosts};

/// A committed or tentative turn result. Two records from opposing peers for
/// the same turn must agree on the first four fields; `remaining_health` is
/// carried for observability only and is not part of the equality check.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationRecord {
    pub attacker: String,
    pub move_used: String,
    pub remaining_health: i64,
    pub damage_dealt: i64,
    pub defender_hp_remaining: i64,
    pub status_message: String,
}

impl CalculationRecord {
    /// Equality on the four disambiguating fields, ignoring `remaining_health`
    /// and `status_message`.
    pub fn matches(&self, other: &CalculationRecord) -> bool {
        self.attacker == other.attacker
            && self.move_used == other.move_used
            && self.damage_dealt == other.damage_dealt
            && self.defender_hp_remaining == other.defender_hp_remaining
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BattlePhase {
    Setup,
    WaitingForMove,
    ProcessingTurn { my_calc: Option<CalculationRecord>, opp_calc: Option<CalculationRecord> },
    GameOver { winner: String, loser: String },
}

/// Outcome of committing a turn once both calculation records agree.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Continued,
    GameOver { winner: String, loser: String },
}

/// Drives one side of a duel: owns the seeded RNG, both combatants' current
/// HP and boost counters, and the current phase.
pub struct BattleEngine {
    pub is_host: bool,
    pub is_my_turn: bool,
    pub phase: BattlePhase,
    pub current_sequence: u64,
    pub current_move: Option<String>,

    pub my_name: String,
    pub opponent_name: String,
    my_combatant: Option<Arc<Combatant>>,
    opponent_combatant: Option<Arc<Combatant>>,
    pub my_current_hp: i64,
    pub opponent_current_hp: i64,
    pub my_boosts: StatBoosts,
    pub opponent_boosts: StatBoosts,

    rng: StdRng,
    moves: HashMap<&'static str, MoveData>,
}

impl BattleEngine {
    pub fn new(seed: u64, is_host: bool) -> Self {
        Self {
            is_host,
            is_my_turn: is_host,
            phase: BattlePhase::Setup,
            current_sequence: 0,
            current_move: None,
            my_name: String::new(),
            opponent_name: String::new(),
            my_combatant: None,
            opponent_combatant: None,
            my_current_hp: 0,
            opponent_current_hp: 0,
            my_boosts: StatBoosts::default(),
            opponent_boosts: StatBoosts::default(),
            rng: seeded_rng(seed),
            moves: move_table(),
        }
    }

    pub fn setup_battle(
        &mut self,
        my: Arc<Combatant>,
        opponent: Arc<Combatant>,
        my_boosts: StatBoosts,
        opponent_boosts: StatBoosts,
    ) {
        self.my_name = my.name.clone();
        self.opponent_name = opponent.name.clone();
        self.my_current_hp = my.hp as i64;
        self.opponent_current_hp = opponent.hp as i64;
        self.my_combatant = Some(my);
        self.opponent_combatant = Some(opponent);
        self.my_boosts = my_boosts;
        self.opponent_boosts = opponent_boosts;
        self.phase = BattlePhase::WaitingForMove;
    }

    pub fn can_attack(&self) -> bool {
        matches!(self.phase, BattlePhase::WaitingForMove) && self.is_my_turn
    }

    /// Called locally when the application initiates an attack. `seq` is the
    /// turn's base sequence number, drawn by the caller from the reliability
    /// layer's shared counter (not generated here) so that the announcer's
    /// consecutive N, N+1, N+2 never collide with other messages — chat,
    /// game-over — this peer sends through that same counter.
    pub fn announce_attack(&mut self, move_name: &str, seq: u64) -> Result<u64, BattleError> {
        if !self.can_attack() {
            return Err(BattleError::CannotAttack);
        }
        self.current_sequence = seq;
        self.current_move = Some(move_name.to_string());
        self.phase = BattlePhase::ProcessingTurn { my_calc: None, opp_calc: None };
        Ok(self.current_sequence)
    }

    /// Called when an `ATTACK_ANNOUNCE` arrives from the opponent. Returns
    /// the turn sequence number carried on the wire message (supplied by the
    /// caller, since the announcer owns sequence numbering).
    pub fn receive_attack_announce(&mut self, move_name: &str, seq: u64) -> Result<u64, BattleError> {
        if self.is_my_turn {
            return Err(BattleError::UnexpectedAnnounce);
        }
        self.current_sequence = seq;
        self.current_move = Some(move_name.to_string());
        self.phase = BattlePhase::ProcessingTurn { my_calc: None, opp_calc: None };
        Ok(self.current_sequence)
    }

    /// Computes this peer's own view of the current turn's outcome. Draws
    /// exactly once from the seeded RNG and mutates the relevant boost
    /// counter. `is_attacker` selects whether this peer's own combatant is
    /// the one dealing damage this turn.
    pub fn compute_own_calculation(&mut self, is_attacker: bool) -> CalculationRecord {
        let move_name = self.current_move.clone().unwrap_or_default();
        let move_data = crate::model::lookup_move(&self.moves, &move_name);

        let attacker_name = if is_attacker { self.my_name.clone() } else { self.opponent_name.clone() };
        let attacker_combatant =
            if is_attacker { self.my_combatant.clone() } else { self.opponent_combatant.clone() }
                .expect("battle set up");
        let defender_combatant =
            if is_attacker { self.opponent_combatant.clone() } else { self.my_combatant.clone() }
                .expect("battle set up");
        let attacker_hp_unchanged = if is_attacker { self.my_current_hp } else { self.opponent_current_hp };
        let defender_hp = if is_attacker { self.opponent_current_hp } else { self.my_current_hp };

        let (damage_dealt, status_message) = if is_attacker {
            calculate_damage(
                &attacker_combatant,
                &attacker_name,
                &defender_combatant,
                move_data,
                &move_name,
                &mut self.my_boosts,
                &mut self.opponent_boosts,
                &mut self.rng,
            )
        } else {
            calculate_damage(
                &attacker_combatant,
                &attacker_name,
                &defender_combatant,
                move_data,
                &move_name,
                &mut self.opponent_boosts,
                &mut self.my_boosts,
                &mut self.rng,
            )
        };
        let defender_hp_remaining = apply_damage(defender_hp, damage_dealt);

        CalculationRecord {
            attacker: attacker_name,
            move_used: move_name,
            remaining_health: attacker_hp_unchanged,
            damage_dealt,
            defender_hp_remaining,
            status_message,
        }
    }

    /// Stores a calculation record (this peer's own, or the opponent's as
    /// received over the wire) into the matching slot and applies its HP
    /// effect to whichever side is the defender in that record.
    pub fn apply_calculation(&mut self, record: CalculationRecord, is_mine: bool) {
        if record.attacker == self.my_name {
            self.opponent_current_hp = record.defender_hp_remaining;
        } else {
            self.my_current_hp = record.defender_hp_remaining;
        }
        if let BattlePhase::ProcessingTurn { my_calc, opp_calc } = &mut self.phase {
            if is_mine {
                *my_calc = Some(record);
            } else {
                *opp_calc = Some(record);
            }
        }
    }

    /// True once both calculation slots are filled and agree on the four
    /// disambiguating fields.
    pub fn calculations_match(&self) -> bool {
        if let BattlePhase::ProcessingTurn { my_calc: Some(mine), opp_calc: Some(theirs) } = &self.phase {
            mine.matches(theirs)
        } else {
            false
        }
    }

    /// Mismatch resolution: adopts `record` as authoritative for both calc
    /// slots. Called by the peer that detects a mismatch (adopting the
    /// opponent's values) and by the peer that receives a
    /// `RESOLUTION_REQUEST` (adopting the requester's values). Idempotent: a
    /// second incoming resolution with the same record is a no-op change.
    pub fn adopt_incoming(&mut self, record: CalculationRecord) {
        self.apply_calculation(record.clone(), true);
        self.apply_calculation(record, false);
    }

    /// Commits the current turn once both calculations agree: flips the
    /// turn and clears both calc slots, or transitions to `GameOver` if
    /// either side's HP has reached zero.
    pub fn confirm_calculation(&mut self) -> Result<TurnOutcome, BattleError> {
        if !matches!(self.phase, BattlePhase::ProcessingTurn { .. }) {
            return Err(BattleError::NotSetUp);
        }
        if self.my_current_hp <= 0 || self.opponent_current_hp <= 0 {
            let (winner, loser) = if self.my_current_hp > 0 {
                (self.my_name.clone(), self.opponent_name.clone())
            } else {
                (self.opponent_name.clone(), self.my_name.clone())
            };
            self.phase = BattlePhase::GameOver { winner: winner.clone(), loser: loser.clone() };
            return Ok(TurnOutcome::GameOver { winner, loser });
        }
        self.is_my_turn = !self.is_my_turn;
        self.current_move = None;
        self.phase = BattlePhase::WaitingForMove;
        Ok(TurnOutcome::Continued)
    }

    pub fn winner(&self) -> Option<(&str, &str)> {
        match &self.phase {
            BattlePhase::GameOver { winner, loser } => Some((winner, loser)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PokemonType;
    use std::collections::HashMap as Map;

    fn combatant(name: &str, hp: u16) -> Arc<Combatant> {
        Arc::new(Combatant {
            name: name.to_string(),
            pokedex_number: 1,
            hp,
            attack: 50,
            defense: 50,
            special_attack: 50,
            special_defense: 50,
            speed: 50,
            type1: PokemonType::Normal,
            type2: None,
            against: Map::new(),
        })
    }

    fn setup(is_host: bool) -> BattleEngine {
        let mut engine = BattleEngine::new(12345, is_host);
        engine.setup_battle(
            combatant("Host", 100),
            combatant("Joiner", 100),
            StatBoosts::default(),
            StatBoosts::default(),
        );
        engine
    }

    #[test]
    fn host_moves_first() {
        let engine = setup(true);
        assert!(engine.is_my_turn);
        assert!(engine.can_attack());
    }

    #[test]
    fn joiner_cannot_attack_before_its_turn() {
        let engine = setup(false);
        assert!(!engine.can_attack());
    }

    #[test]
    fn announce_attack_requires_waiting_for_move() {
        let mut engine = setup(false);
        assert!(matches!(engine.announce_attack("Tackle", 1), Err(BattleError::CannotAttack)));
    }

    #[test]
    fn matching_calculations_flip_turn_and_clear_slots() {
        let mut engine = setup(true);
        engine.announce_attack("Tackle", 1).unwrap();
        let mine = engine.compute_own_calculation(true);
        let theirs = mine.clone();
        engine.apply_calculation(mine, true);
        engine.apply_calculation(theirs, false);
        assert!(engine.calculations_match());
        let outcome = engine.confirm_calculation().unwrap();
        assert_eq!(outcome, TurnOutcome::Continued);
        assert!(!engine.is_my_turn);
        assert!(matches!(engine.phase, BattlePhase::WaitingForMove));
    }

    #[test]
    fn mismatch_is_resolved_by_adopting_incoming_values() {
        let mut engine = setup(true);
        engine.announce_attack("Tackle", 1).unwrap();
        let mine = engine.compute_own_calculation(true);
        let mut theirs = mine.clone();
        theirs.damage_dealt = mine.damage_dealt + 1;
        theirs.defender_hp_remaining = mine.defender_hp_remaining - 1;
        engine.apply_calculation(mine, true);
        engine.apply_calculation(theirs.clone(), false);
        assert!(!engine.calculations_match());
        engine.adopt_incoming(theirs.clone());
        assert!(engine.calculations_match());
        assert_eq!(engine.opponent_current_hp, theirs.defender_hp_remaining);
    }

    #[test]
    fn game_over_declares_the_surviving_combatant_winner() {
        let mut engine = setup(true);
        engine.announce_attack("Tackle", 1).unwrap();
        let mut record = engine.compute_own_calculation(true);
        record.defender_hp_remaining = 0;
        engine.apply_calculation(record.clone(), true);
        engine.apply_calculation(record, false);
        let outcome = engine.confirm_calculation().unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::GameOver { winner: "Host".to_string(), loser: "Joiner".to_string() }
        );
        assert_eq!(engine.winner(), Some(("Host", "Joiner")));
    }
}
