//! Data validation utilities.
//!
//! Cross-checks era and terrain RON files: dangling type references,
//! duplicate ids, unknown availability markers, terrain aliases that
//! reference undefined codes or loop back into themselves.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::warn;

use hexfall_core::error::{GameError, Result};
use hexfall_core::terrain::{TerrainId, TerrainTable, TerrainToken};
use hexfall_core::unit_type::{EraData, TypeRegistry, UnitType};

fn validation_error(path: &Path, message: impl Into<String>) -> GameError {
    GameError::ValidationError {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Load and cross-check a set of era files (and optionally a terrain
/// table).
///
/// # Errors
///
/// Returns the first hard failure: unparsable file, duplicate type id,
/// dangling `advances_to`/race/movement-type reference, or a terrain
/// alias that never resolves. Suspicious-but-legal data (unknown
/// availability markers, unaliased terrain references) is only warned
/// about.
pub fn validate_data(era_paths: &[&Path], terrain_path: Option<&Path>) -> Result<()> {
    let mut registry = TypeRegistry::new();
    let mut seen_types = BTreeSet::new();
    let mut eras: Vec<(&Path, EraData)> = Vec::new();

    for &path in era_paths {
        let text = fs::read_to_string(path).map_err(|e| GameError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let era: EraData = ron::from_str(&text).map_err(|e| GameError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        for ty in &era.types {
            if !seen_types.insert(ty.id.clone()) {
                return Err(validation_error(
                    path,
                    format!("duplicate unit type id '{}'", ty.id),
                ));
            }
        }
        registry.load_era(era.clone());
        eras.push((path, era));
    }

    // Cross-file references resolve against the fully merged registry,
    // attributed to the file that defined the type.
    for (path, era) in &eras {
        for ty in &era.types {
            check_type(&registry, ty, path)?;
        }
    }

    if let Some(path) = terrain_path {
        let text = fs::read_to_string(path).map_err(|e| GameError::DataParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let table = TerrainTable::from_ron_str(&path.display().to_string(), &text)?;
        check_terrain(&table, path)?;
    }

    Ok(())
}

fn check_type(registry: &TypeRegistry, ty: &UnitType, path: &Path) -> Result<()> {
    for target in &ty.advances_to {
        if !registry.contains(target) {
            return Err(validation_error(
                path,
                format!("type '{}' advances to unknown type '{target}'", ty.id),
            ));
        }
    }
    if !ty.race.is_empty() && registry.race(&ty.race).is_none() {
        warn!(type_id = %ty.id, race = %ty.race, "type references an unregistered race");
    }
    if let Some(movement_type) = &ty.movement_type {
        if registry.movement_type(movement_type).is_none() {
            return Err(validation_error(
                path,
                format!(
                    "type '{}' references unknown movement type '{movement_type}'",
                    ty.id
                ),
            ));
        }
    }

    let mut trait_ids = BTreeSet::new();
    for candidate in &ty.possible_traits {
        if !trait_ids.insert(candidate.id.clone()) {
            return Err(validation_error(
                path,
                format!(
                    "type '{}' lists trait '{}' more than once",
                    ty.id, candidate.id
                ),
            ));
        }
        match candidate.availability.as_deref() {
            None | Some("musthave") | Some("any") | Some("none") => {}
            Some(other) => {
                warn!(
                    type_id = %ty.id,
                    trait_id = %candidate.id,
                    availability = other,
                    "unknown trait availability marker"
                );
            }
        }
    }

    for variant in ty.gender_variants.values() {
        check_type(registry, variant, path)?;
    }
    for variant in ty.variations.values() {
        check_type(registry, variant, path)?;
    }
    Ok(())
}

fn check_terrain(table: &TerrainTable, path: &Path) -> Result<()> {
    for (id, def) in table.iter() {
        for token in def.mvt_alias.iter().chain(def.def_alias.iter()) {
            if let TerrainToken::Terrain(target) = token {
                if table.get(target).is_none() {
                    warn!(
                        terrain = %id,
                        target = %target,
                        "alias references a terrain with no definition (treated as atomic)"
                    );
                }
            }
        }
        if alias_loops(table, id, &def.mvt_alias, 0) || alias_loops(table, id, &def.def_alias, 0) {
            return Err(validation_error(
                path,
                format!("terrain alias '{id}' never resolves (cyclic definition)"),
            ));
        }
    }
    Ok(())
}

/// Walk an alias expansion looking for the defining terrain, bounded by
/// the engine's own recursion cap.
fn alias_loops(table: &TerrainTable, root: &TerrainId, tokens: &[TerrainToken], depth: u32) -> bool {
    if depth >= 100 {
        return true;
    }
    for token in tokens {
        let TerrainToken::Terrain(target) = token else {
            continue;
        };
        if target == root {
            return true;
        }
        if let Some(def) = table.get(target) {
            if alias_loops(table, root, &def.mvt_alias, depth + 1)
                || alias_loops(table, root, &def.def_alias, depth + 1)
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexfall_core::terrain::TerrainDef;

    #[test]
    fn test_alias_cycle_detection() {
        let mut table = TerrainTable::new();
        table.insert(
            TerrainId::new("A"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![TerrainToken::Terrain(TerrainId::new("B"))],
                def_alias: Vec::new(),
            },
        );
        table.insert(
            TerrainId::new("B"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![TerrainToken::Terrain(TerrainId::new("A"))],
                def_alias: Vec::new(),
            },
        );
        let err = check_terrain(&table, Path::new("terrain.ron")).unwrap_err();
        assert!(matches!(err, GameError::ValidationError { .. }));
    }

    #[test]
    fn test_acyclic_alias_passes() {
        let mut table = TerrainTable::new();
        table.insert(TerrainId::new("Ff"), TerrainDef::default());
        table.insert(TerrainId::new("Hh"), TerrainDef::default());
        table.insert(
            TerrainId::new("Wh"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("Ff")),
                    TerrainToken::Terrain(TerrainId::new("Hh")),
                ],
                def_alias: Vec::new(),
            },
        );
        assert!(check_terrain(&table, Path::new("terrain.ron")).is_ok());
    }
}
