//! Terrain identifiers, alias composition and the terrain info port.
//!
//! Terrain codes may be *aliases* that decompose into an ordered list of
//! underlying codes combined with PLUS/MINUS operators. The fold over
//! those lists lives with the unit's cached lookups
//! ([`crate::unit::Unit::movement_cost`] and
//! [`crate::unit::Unit::defense_modifier`]); this module supplies the
//! vocabulary and a concrete RON-loadable catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

/// Movement cost sentinel for terrain a unit cannot enter.
pub const UNREACHABLE: i32 = 10_000_000;

/// Identifier of a terrain code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TerrainId(String);

impl TerrainId {
    /// Create a terrain id.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The raw terrain code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TerrainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of an alias decomposition list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainToken {
    /// Switch the fold back to "best in the increasing direction".
    Plus,
    /// Switch the fold to "best in the decreasing direction".
    Minus,
    /// An underlying terrain code.
    Terrain(TerrainId),
}

/// Terrain information supplied by the map subsystem.
pub trait TerrainCatalog {
    /// Alias decomposition used for movement costs.
    ///
    /// Non-alias terrains return the single-element list `[terrain]`.
    fn underlying_movement(&self, terrain: &TerrainId) -> Vec<TerrainToken>;

    /// Alias decomposition used for defense.
    fn underlying_defense(&self, terrain: &TerrainId) -> Vec<TerrainToken>;

    /// Identifier used to key per-unit cost/defense tables.
    fn display_id(&self, terrain: &TerrainId) -> String;
}

/// One terrain definition in a [`TerrainTable`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainDef {
    /// Identifier used in per-unit cost/defense tables; the code itself
    /// when empty.
    #[serde(default)]
    pub display: String,

    /// Movement alias decomposition; empty means the terrain is atomic.
    #[serde(default)]
    pub mvt_alias: Vec<TerrainToken>,

    /// Defense alias decomposition; empty means the terrain is atomic.
    #[serde(default)]
    pub def_alias: Vec<TerrainToken>,
}

/// Concrete, data-driven implementation of [`TerrainCatalog`].
///
/// Suitable for tools, tests and single-process embeddings; games with a
/// full map subsystem implement the trait themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainTable {
    /// Terrain definitions by code.
    #[serde(default)]
    terrains: BTreeMap<TerrainId, TerrainDef>,
}

impl TerrainTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a terrain definition.
    pub fn insert(&mut self, id: TerrainId, def: TerrainDef) {
        self.terrains.insert(id, def);
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, id: &TerrainId) -> Option<&TerrainDef> {
        self.terrains.get(id)
    }

    /// Iterate over all definitions.
    pub fn iter(&self) -> impl Iterator<Item = (&TerrainId, &TerrainDef)> {
        self.terrains.iter()
    }

    /// Parse a table from RON text.
    pub fn from_ron_str(source: &str, text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| GameError::DataParseError {
            path: source.to_string(),
            message: e.to_string(),
        })
    }
}

impl TerrainCatalog for TerrainTable {
    fn underlying_movement(&self, terrain: &TerrainId) -> Vec<TerrainToken> {
        match self.terrains.get(terrain) {
            Some(def) if !def.mvt_alias.is_empty() => def.mvt_alias.clone(),
            _ => vec![TerrainToken::Terrain(terrain.clone())],
        }
    }

    fn underlying_defense(&self, terrain: &TerrainId) -> Vec<TerrainToken> {
        match self.terrains.get(terrain) {
            Some(def) if !def.def_alias.is_empty() => def.def_alias.clone(),
            _ => vec![TerrainToken::Terrain(terrain.clone())],
        }
    }

    fn display_id(&self, terrain: &TerrainId) -> String {
        match self.terrains.get(terrain) {
            Some(def) if !def.display.is_empty() => def.display.clone(),
            _ => terrain.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_terrain_is_atomic() {
        let table = TerrainTable::new();
        let id = TerrainId::new("Gg");
        assert_eq!(
            table.underlying_movement(&id),
            vec![TerrainToken::Terrain(id.clone())]
        );
        assert_eq!(table.display_id(&id), "Gg");
    }

    #[test]
    fn test_display_id_prefers_configured_name() {
        let mut table = TerrainTable::new();
        table.insert(
            TerrainId::new("Gg"),
            TerrainDef {
                display: "grassland".to_string(),
                ..TerrainDef::default()
            },
        );
        assert_eq!(table.display_id(&TerrainId::new("Gg")), "grassland");
    }

    #[test]
    fn test_ron_round_trip() {
        let mut table = TerrainTable::new();
        table.insert(
            TerrainId::new("Wh"),
            TerrainDef {
                display: "wooded_hills".to_string(),
                mvt_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("Ff")),
                    TerrainToken::Terrain(TerrainId::new("Hh")),
                ],
                def_alias: vec![
                    TerrainToken::Minus,
                    TerrainToken::Terrain(TerrainId::new("Ff")),
                    TerrainToken::Terrain(TerrainId::new("Hh")),
                ],
            },
        );
        let text = ron::to_string(&table).unwrap();
        let back = TerrainTable::from_ron_str("inline", &text).unwrap();
        assert_eq!(back.underlying_movement(&TerrainId::new("Wh")).len(), 2);
        assert_eq!(back.underlying_defense(&TerrainId::new("Wh")).len(), 3);
    }
}
