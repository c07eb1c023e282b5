//! Combatant stats and move metadata: the immutable data both peers agree on
//! before a battle begins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PokemonType {
    Normal,
    Fire,
    Water,
    Grass,
    Electric,
    Ice,
    Fighting,
    Poison,
    Ground,
    Flying,
    Psychic,
    Bug,
    Rock,
    Ghost,
    Dragon,
    Dark,
    Steel,
    Fairy,
}

impl PokemonType {
    /// Parses a type name case-insensitively; unrecognized names default to `Normal`,
    /// matching the move table's fallback for an unknown move.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "fire" => Self::Fire,
            "water" => Self::Water,
            "grass" => Self::Grass,
            "electric" => Self::Electric,
            "ice" => Self::Ice,
            "fighting" => Self::Fighting,
            "poison" => Self::Poison,
            "ground" => Self::Ground,
            "flying" => Self::Flying,
            "psychic" => Self::Psychic,
            "bug" => Self::Bug,
            "rock" => Self::Rock,
            "ghost" => Self::Ghost,
            "dragon" => Self::Dragon,
            "dark" => Self::Dark,
            "steel" => Self::Steel,
            "fairy" => Self::Fairy,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Fire => "fire",
            Self::Water => "water",
            Self::Grass => "grass",
            Self::Electric => "electric",
            Self::Ice => "ice",
            Self::Fighting => "fighting",
            Self::Poison => "poison",
            Self::Ground => "ground",
            Self::Flying => "flying",
            Self::Psychic => "psychic",
            Self::Bug => "bug",
            Self::Rock => "rock",
            Self::Ghost => "ghost",
            Self::Dragon => "dragon",
            Self::Dark => "dark",
            Self::Steel => "steel",
            Self::Fairy => "fairy",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DamageCategory {
    Physical,
    Special,
}

impl DamageCategory {
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "physical" => Self::Physical,
            _ => Self::Special,
        }
    }
}

/// A Pokemon's immutable stat block. Produced by the combatant database
/// collaborator, shared by reference into battle state, never mutated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Combatant {
    pub name: String,
    pub pokedex_number: u32,
    pub hp: u16,
    pub attack: u16,
    pub defense: u16,
    pub special_attack: u16,
    pub special_defense: u16,
    pub speed: u16,
    pub type1: PokemonType,
    pub type2: Option<PokemonType>,
    /// Combined incoming-damage multiplier per attacking type. Already accounts
    /// for both `type1` and `type2`; the engine must not multiply this again.
    pub against: HashMap<String, f64>,
}

impl Combatant {
    /// Looks up the stored effectiveness multiplier for an incoming move's type.
    /// Unknown types default to 1.0.
    pub fn against(&self, move_type: PokemonType) -> f64 {
        self.against
            .get(move_type.as_str())
            .copied()
            .unwrap_or(1.0)
    }
}

/// Move metadata: (type, base power, damage category). Looked up by
/// lowercased name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MoveData {
    pub move_type: PokemonType,
    pub power: f64,
    pub category: DamageCategory,
}

/// The default move used when a name is absent from the move table.
pub const DEFAULT_MOVE: MoveData = MoveData {
    move_type: PokemonType::Normal,
    power: 40.0,
    category: DamageCategory::Physical,
};

/// Hardcoded 13-entry move table, carried over from the reference
/// implementation's `MOVE_DATABASE` verbatim.
pub fn move_table() -> HashMap<&'static str, MoveData> {
    use DamageCategory::*;
    use PokemonType::*;
    let mut table = HashMap::new();
    table.insert(
        "thunderbolt",
        MoveData { move_type: Electric, power: 90.0, category: Special },
    );
    table.insert(
        "thunder",
        MoveData { move_type: Electric, power: 110.0, category: Special },
    );
    table.insert(
        "quick attack",
        MoveData { move_type: Normal, power: 40.0, category: Physical },
    );
    table.insert(
        "tackle",
        MoveData { move_type: Normal, power: 40.0, category: Physical },
    );
    table.insert(
        "ember",
        MoveData { move_type: Fire, power: 40.0, category: Special },
    );
    table.insert(
        "flamethrower",
        MoveData { move_type: Fire, power: 90.0, category: Special },
    );
    table.insert(
        "water gun",
        MoveData { move_type: Water, power: 40.0, category: Special },
    );
    table.insert(
        "water shuriken",
        MoveData { move_type: Water, power: 75.0, category: Special },
    );
    table.insert(
        "hydro pump",
        MoveData { move_type: Water, power: 110.0, category: Special },
    );
    table.insert(
        "vine whip",
        MoveData { move_type: Grass, power: 45.0, category: Physical },
    );
    table.insert(
        "solar beam",
        MoveData { move_type: Grass, power: 120.0, category: Special },
    );
    table.insert(
        "scratch",
        MoveData { move_type: Normal, power: 40.0, category: Physical },
    );
    table.insert(
        "bite",
        MoveData { move_type: Dark, power: 60.0, category: Physical },
    );
    table
}

/// Looks up a move by name (case-insensitive), falling back to `DEFAULT_MOVE`.
pub fn lookup_move(table: &HashMap<&'static str, MoveData>, name: &str) -> MoveData {
    table
        .get(name.to_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_MOVE)
}

/// The recognized stat-boost counters, each consumed at most once per use and
/// never replenished mid-battle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatBoosts {
    pub special_attack_uses: u32,
    pub special_defense_uses: u32,
}

impl Default for StatBoosts {
    fn default() -> Self {
        Self { special_attack_uses: 5, special_defense_uses: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_move_falls_back_to_default() {
        let table = move_table();
        let mv = lookup_move(&table, "Splash");
        assert_eq!(mv, DEFAULT_MOVE);
    }

    #[test]
    fn move_lookup_is_case_insensitive() {
        let table = move_table();
        let mv = lookup_move(&table, "THUNDERBOLT");
        assert_eq!(mv.power, 90.0);
        assert_eq!(mv.category, DamageCategory::Special);
    }

    #[test]
    fn unknown_type_defaults_to_neutral_effectiveness() {
        let combatant = Combatant {
            name: "Test".into(),
            pokedex_number: 0,
            hp: 1,
            attack: 1,
            defense: 1,
            special_attack: 1,
            special_defense: 1,
            speed: 1,
            type1: PokemonType::Normal,
            type2: None,
            against: HashMap::new(),
        };
        assert_eq!(combatant.against(PokemonType::Fire), 1.0);
    }
}
