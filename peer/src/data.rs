//! Loads the combatant database collaborator from a JSON file, the same way
//! the reference server loads its pokedex: read the file, parse a JSON
//! array, index it into a map keyed by lowercased name.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use poke_protocol_core::model::Combatant;

pub fn load_combatants(path: &str) -> Result<Arc<HashMap<String, Combatant>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read combatant database at {path}"))?;
    let list: Vec<Combatant> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse combatant database at {path}"))?;
    let map = list
        .into_iter()
        .map(|combatant| (combatant.name.to_lowercase(), combatant))
        .collect();
    Ok(Arc::new(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_lowercases_keys() {
        let json = r#"[
            {"name":"Pikachu","pokedex_number":25,"hp":35,"attack":55,"defense":40,
             "special_attack":50,"special_defense":50,"speed":90,
             "type1":"electric","type2":null,"against":{"ground":2.0}}
        ]"#;
        let path = std::env::temp_dir().join(format!("poke_protocol_test_{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        let combatants = load_combatants(path.to_str().unwrap()).unwrap();
        assert!(combatants.contains_key("pikachu"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_combatants("/nonexistent/combatants.json").is_err());
    }
}
