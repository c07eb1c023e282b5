//! Deterministic damage computation. Both peers must produce bit-identical
//! results from the same seeded RNG state and the same inputs for the
//! lockstep to converge.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Combatant, DamageCategory, MoveData, StatBoosts};

/// Constructs the shared RNG stream both peers seed identically at handshake.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

const LEVEL: f64 = 50.0;
const SPECIAL_BOOST_MULTIPLIER: f64 = 1.5;

/// Computes the damage dealt by `attacker` using `move_data` against
/// `defender`, drawing exactly one value from `rng`. Mutates the boost
/// counters in place when a special-category boost is consumed. Returns
/// `(damage_dealt, status_message)`.
///
/// Truncation happens at exactly two points: the boosted stat (if a boost
/// applies) and the final damage value. No other rounding occurs.
pub fn calculate_damage(
    attacker: &Combatant,
    attacker_name: &str,
    defender: &Combatant,
    move_data: MoveData,
    move_name: &str,
    attacker_boosts: &mut StatBoosts,
    defender_boosts: &mut StatBoosts,
    rng: &mut StdRng,
) -> (i64, String) {
    let (mut attacker_stat, mut defender_stat) = match move_data.category {
        DamageCategory::Physical => (attacker.attack as f64, defender.defense as f64),
        DamageCategory::Special => (attacker.special_attack as f64, defender.special_defense as f64),
    };

    if move_data.category == DamageCategory::Special {
        if attacker_boosts.special_attack_uses > 0 {
            attacker_stat = (attacker_stat * SPECIAL_BOOST_MULTIPLIER).trunc();
            attacker_boosts.special_attack_uses -= 1;
        }
        if defender_boosts.special_defense_uses > 0 {
            defender_stat = (defender_stat * SPECIAL_BOOST_MULTIPLIER).trunc();
            defender_boosts.special_defense_uses -= 1;
        }
    }

    let type_effectiveness = defender.against(move_data.move_type);
    let random_factor: f64 = rng.gen_range(0.85..1.0);

    let raw = ((2.0 * LEVEL / 5.0 + 2.0) * move_data.power * attacker_stat / defender_stat / 50.0 + 2.0)
        * type_effectiveness
        * random_factor;
    let damage_dealt = raw as i64;

    let effectiveness_text = if type_effectiveness >= 2.0 {
        " It was super effective!"
    } else if type_effectiveness == 0.0 {
        " It had no effect!"
    } else if type_effectiveness <= 0.5 {
        " It's not very effective..."
    } else {
        ""
    };
    let status_message = format!("{attacker_name} used {move_name}!{effectiveness_text}");

    (damage_dealt, status_message)
}

/// Applies damage to current HP, clamping at zero.
pub fn apply_damage(current_hp: i64, damage: i64) -> i64 {
    (current_hp - damage).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PokemonType;
    use std::collections::HashMap;

    fn pikachu() -> Combatant {
        let mut against = HashMap::new();
        against.insert("electric".to_string(), 0.5);
        Combatant {
            name: "Pikachu".into(),
            pokedex_number: 25,
            hp: 35,
            attack: 55,
            defense: 40,
            special_attack: 50,
            special_defense: 50,
            speed: 90,
            type1: PokemonType::Electric,
            type2: None,
            against,
        }
    }

    fn charmander() -> Combatant {
        let mut against = HashMap::new();
        against.insert("electric".to_string(), 1.0);
        Combatant {
            name: "Charmander".into(),
            pokedex_number: 4,
            hp: 39,
            attack: 52,
            defense: 43,
            special_attack: 60,
            special_defense: 50,
            speed: 65,
            type1: PokemonType::Fire,
            type2: None,
            against,
        }
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let move_data = MoveData { move_type: PokemonType::Electric, power: 90.0, category: DamageCategory::Special };
        let run = || {
            let mut rng = seeded_rng(12345);
            let mut atk_boosts = StatBoosts::default();
            let mut def_boosts = StatBoosts::default();
            calculate_damage(
                &pikachu(),
                "Pikachu",
                &charmander(),
                move_data,
                "Thunderbolt",
                &mut atk_boosts,
                &mut def_boosts,
                &mut rng,
            )
        };
        let (d1, msg1) = run();
        let (d2, msg2) = run();
        assert_eq!(d1, d2);
        assert_eq!(msg1, msg2);
    }

    #[test]
    fn zero_effectiveness_deals_no_damage() {
        let mut against = HashMap::new();
        against.insert("electric".to_string(), 0.0);
        let defender = Combatant { against, ..charmander() };
        let move_data = MoveData { move_type: PokemonType::Electric, power: 90.0, category: DamageCategory::Special };
        let mut rng = seeded_rng(1);
        let mut atk_boosts = StatBoosts::default();
        let mut def_boosts = StatBoosts::default();
        let (damage, message) = calculate_damage(
            &pikachu(),
            "Pikachu",
            &defender,
            move_data,
            "Thunderbolt",
            &mut atk_boosts,
            &mut def_boosts,
            &mut rng,
        );
        assert_eq!(damage, 0);
        assert!(message.ends_with(" It had no effect!"));
    }

    #[test]
    fn special_boost_is_consumed_exactly_once_then_unboosted() {
        let move_data = MoveData { move_type: PokemonType::Electric, power: 90.0, category: DamageCategory::Special };
        let mut rng = seeded_rng(99);
        let mut atk_boosts = StatBoosts { special_attack_uses: 1, special_defense_uses: 0 };
        let mut def_boosts = StatBoosts::default();
        let _ = calculate_damage(
            &pikachu(),
            "Pikachu",
            &charmander(),
            move_data,
            "Thunderbolt",
            &mut atk_boosts,
            &mut def_boosts,
            &mut rng,
        );
        assert_eq!(atk_boosts.special_attack_uses, 0);
    }

    #[test]
    fn physical_moves_ignore_boost_counters() {
        let move_data = MoveData { move_type: PokemonType::Normal, power: 40.0, category: DamageCategory::Physical };
        let mut rng = seeded_rng(7);
        let mut atk_boosts = StatBoosts { special_attack_uses: 5, special_defense_uses: 5 };
        let mut def_boosts = StatBoosts { special_attack_uses: 5, special_defense_uses: 5 };
        let _ = calculate_damage(
            &pikachu(),
            "Pikachu",
            &charmander(),
            move_data,
            "Tackle",
            &mut atk_boosts,
            &mut def_boosts,
            &mut rng,
        );
        assert_eq!(atk_boosts.special_attack_uses, 5);
        assert_eq!(def_boosts.special_defense_uses, 5);
    }

    #[test]
    fn apply_damage_clamps_at_zero() {
        assert_eq!(apply_damage(10, 25), 0);
        assert_eq!(apply_damage(10, 4), 6);
    }
}
