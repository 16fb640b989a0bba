//! Unit type templates and the global type registry.
//!
//! [`UnitType`] is the immutable template a unit resolves against:
//! base stats, attack list, trait pool, advancement pools, gendered and
//! named variants. Types are owned by a [`TypeRegistry`] and never change
//! after load; resolving an unknown type id is a fatal error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attack::Attack;
use crate::attr::Attrs;
use crate::error::{GameError, Result};
use crate::modification::Modification;
use crate::rng::{draw, RandomSource};

/// Unit gender.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Gender {
    /// Male (the default when a type declares no genders).
    #[default]
    Male,
    /// Female.
    Female,
}

impl Gender {
    /// Data-file spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Parse the data-file spelling.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Unit alignment, driving time-of-day combat bonuses (resolved by the
/// combat layer, carried here).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Stronger by day.
    Lawful,
    /// Unaffected.
    #[default]
    Neutral,
    /// Stronger by night.
    Chaotic,
}

impl Alignment {
    /// Data-file spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Alignment::Lawful => "lawful",
            Alignment::Neutral => "neutral",
            Alignment::Chaotic => "chaotic",
        }
    }

    /// Parse the data-file spelling; anything else is neutral.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "lawful" => Alignment::Lawful,
            "chaotic" => Alignment::Chaotic,
            _ => Alignment::Neutral,
        }
    }
}

/// A race: shared flavour and name pools for a family of types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Race {
    /// Race identifier.
    pub id: String,

    /// Name pool for male units.
    #[serde(default)]
    pub male_names: Vec<String>,

    /// Name pool for female units.
    #[serde(default)]
    pub female_names: Vec<String>,
}

impl Race {
    /// Draw a name for a unit of the given gender.
    ///
    /// Uses the injected deterministic source when supplied, the fallback
    /// stream otherwise. Empty pools yield an empty name.
    #[must_use]
    pub fn generate_name(&self, gender: Gender, rng: Option<&mut (dyn RandomSource + '_)>) -> String {
        let pool = match gender {
            Gender::Male => &self.male_names,
            Gender::Female => &self.female_names,
        };
        if pool.is_empty() {
            return String::new();
        }
        let index = draw(rng) as usize % pool.len();
        pool[index].clone()
    }
}

fn default_experience() -> i32 {
    500
}

fn default_max_attacks() -> i32 {
    1
}

fn default_genders() -> Vec<Gender> {
    vec![Gender::Male]
}

/// Immutable template for a kind of unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitType {
    /// Stable type id.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Flavour description.
    #[serde(default)]
    pub description: String,

    /// Race id.
    #[serde(default)]
    pub race: String,

    /// Base hitpoints (also the spawn maximum).
    pub hitpoints: i32,

    /// Base movement per turn.
    pub movement: i32,

    /// Experience needed to advance.
    #[serde(default = "default_experience")]
    pub experience: i32,

    /// Level.
    #[serde(default)]
    pub level: i32,

    /// Alignment.
    #[serde(default)]
    pub alignment: Alignment,

    /// Recruit cost.
    #[serde(default)]
    pub cost: i32,

    /// Zone-of-control override; absent means "levels 1 and up exert ZoC".
    #[serde(default)]
    pub zoc: Option<bool>,

    /// True for flying movement (ignores terrain in the movement layer's
    /// pathing; carried here as a flag).
    #[serde(default)]
    pub flying: bool,

    /// Attacks allowed per turn.
    #[serde(default = "default_max_attacks")]
    pub max_attacks: i32,

    /// Attack list.
    #[serde(default)]
    pub attacks: Vec<Attack>,

    /// Type ids this unit advances to on level-up.
    #[serde(default)]
    pub advances_to: Vec<String>,

    /// After-max-level advancement pool.
    #[serde(default)]
    pub advancements: Vec<Modification>,

    /// How many traits units of this type roll.
    #[serde(default)]
    pub num_traits: u32,

    /// Trait pool candidates.
    #[serde(default)]
    pub possible_traits: Vec<Modification>,

    /// Genders units of this type can spawn with.
    #[serde(default = "default_genders")]
    pub genders: Vec<Gender>,

    /// Full per-gender template overrides.
    #[serde(default)]
    pub gender_variants: BTreeMap<Gender, UnitType>,

    /// Named variations of this type.
    #[serde(default)]
    pub variations: BTreeMap<String, UnitType>,

    /// Movement-type reference; its document merges beneath this type's.
    #[serde(default)]
    pub movement_type: Option<String>,

    /// Base attribute document: abilities, defense, resistance,
    /// movement_costs sections plus anything else carried opaquely.
    #[serde(default)]
    pub attrs: Attrs,
}

impl Default for UnitType {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            race: String::new(),
            hitpoints: 1,
            movement: 0,
            experience: default_experience(),
            level: 0,
            alignment: Alignment::Neutral,
            cost: 0,
            zoc: None,
            flying: false,
            max_attacks: default_max_attacks(),
            attacks: Vec::new(),
            advances_to: Vec::new(),
            advancements: Vec::new(),
            num_traits: 0,
            possible_traits: Vec::new(),
            genders: default_genders(),
            gender_variants: BTreeMap::new(),
            variations: BTreeMap::new(),
            movement_type: None,
            attrs: Attrs::new(),
        }
    }
}

impl UnitType {
    /// Resolve the concrete variant for a gender and variation name.
    ///
    /// The gender variant is looked up first, then the variation within
    /// it; missing entries fall back to the type itself.
    #[must_use]
    pub fn variant(&self, gender: Gender, variation: &str) -> &UnitType {
        let by_gender = self.gender_variants.get(&gender).unwrap_or(self);
        if variation.is_empty() {
            return by_gender;
        }
        by_gender.variations.get(variation).unwrap_or(by_gender)
    }

    /// Whether units of this type exert a zone of control.
    #[must_use]
    pub fn has_zoc(&self) -> bool {
        self.zoc.unwrap_or(self.level >= 1)
    }

    /// Experience needed to advance.
    #[must_use]
    pub fn experience_needed(&self) -> i32 {
        self.experience
    }
}

/// An era: one loadable bundle of races, movement types and unit types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EraData {
    /// Era identifier.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Races referenced by the era's types.
    #[serde(default)]
    pub races: Vec<Race>,

    /// Movement-type parent documents by name.
    #[serde(default)]
    pub movement_types: BTreeMap<String, Attrs>,

    /// Unit type definitions.
    #[serde(default)]
    pub types: Vec<UnitType>,
}

/// Global registry of unit types, races and movement types.
///
/// Immutable after load; every unit resolves its template here.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, UnitType>,
    races: BTreeMap<String, Race>,
    movement_types: BTreeMap<String, Attrs>,
    experience_accelerator: i32,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
            races: BTreeMap::new(),
            movement_types: BTreeMap::new(),
            experience_accelerator: 100,
        }
    }

    /// Resolve a type id.
    ///
    /// # Errors
    ///
    /// [`GameError::UnknownUnitType`] when the id is not registered. This
    /// is a load/config failure and must abort the construction in
    /// progress.
    pub fn resolve(&self, type_id: &str) -> Result<&UnitType> {
        self.types
            .get(type_id)
            .ok_or_else(|| GameError::UnknownUnitType {
                type_id: type_id.to_string(),
            })
    }

    /// Non-failing lookup.
    #[must_use]
    pub fn get(&self, type_id: &str) -> Option<&UnitType> {
        self.types.get(type_id)
    }

    /// True when the id is registered.
    #[must_use]
    pub fn contains(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    /// Register a type under its own id.
    pub fn insert_type(&mut self, ty: UnitType) {
        self.types.insert(ty.id.clone(), ty);
    }

    /// Register a race under its own id.
    pub fn insert_race(&mut self, race: Race) {
        self.races.insert(race.id.clone(), race);
    }

    /// Register a movement-type parent document.
    pub fn insert_movement_type(&mut self, name: impl Into<String>, doc: Attrs) {
        self.movement_types.insert(name.into(), doc);
    }

    /// Look up a race.
    #[must_use]
    pub fn race(&self, id: &str) -> Option<&Race> {
        self.races.get(id)
    }

    /// Look up a movement-type parent document.
    #[must_use]
    pub fn movement_type(&self, name: &str) -> Option<&Attrs> {
        self.movement_types.get(name)
    }

    /// Iterate over all registered types.
    pub fn types(&self) -> impl Iterator<Item = &UnitType> {
        self.types.values()
    }

    /// Experience-threshold accelerator in percent (campaign/difficulty
    /// setting; 100 = unmodified).
    #[must_use]
    pub fn experience_accelerator(&self) -> i32 {
        self.experience_accelerator
    }

    /// Set the experience accelerator. Clamped to at least 1 percent.
    pub fn set_experience_accelerator(&mut self, percent: i32) {
        self.experience_accelerator = percent.max(1);
    }

    /// Merge an era bundle into the registry.
    pub fn load_era(&mut self, era: EraData) {
        for race in era.races {
            self.insert_race(race);
        }
        for (name, doc) in era.movement_types {
            self.insert_movement_type(name, doc);
        }
        for ty in era.types {
            self.insert_type(ty);
        }
    }

    /// Parse an era bundle from RON text and merge it.
    ///
    /// # Errors
    ///
    /// [`GameError::DataParseError`] labelled with `source` on bad input.
    pub fn load_era_str(&mut self, source: &str, text: &str) -> Result<()> {
        let era: EraData = ron::from_str(text).map_err(|e| GameError::DataParseError {
            path: source.to_string(),
            message: e.to_string(),
        })?;
        self.load_era(era);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spearman() -> UnitType {
        UnitType {
            id: "spearman".to_string(),
            name: "Spearman".to_string(),
            race: "human".to_string(),
            hitpoints: 36,
            movement: 5,
            level: 1,
            ..UnitType::default()
        }
    }

    #[test]
    fn test_resolve_unknown_type_is_fatal() {
        let registry = TypeRegistry::new();
        let err = registry.resolve("ghost").unwrap_err();
        assert!(matches!(
            err,
            crate::error::GameError::UnknownUnitType { type_id } if type_id == "ghost"
        ));
    }

    #[test]
    fn test_variant_falls_back_to_self() {
        let ty = spearman();
        let v = ty.variant(Gender::Female, "wounded");
        assert_eq!(v.id, "spearman");
    }

    #[test]
    fn test_variant_resolves_gender_then_variation() {
        let mut ty = spearman();
        let mut female = spearman();
        female.name = "Spearwoman".to_string();
        let mut veteran = spearman();
        veteran.hitpoints = 40;
        female.variations.insert("veteran".to_string(), veteran);
        ty.gender_variants.insert(Gender::Female, female);

        assert_eq!(ty.variant(Gender::Female, "").name, "Spearwoman");
        assert_eq!(ty.variant(Gender::Female, "veteran").hitpoints, 40);
        assert_eq!(ty.variant(Gender::Male, "").name, "Spearman");
    }

    #[test]
    fn test_zoc_defaults_by_level() {
        let mut ty = spearman();
        assert!(ty.has_zoc());
        ty.level = 0;
        assert!(!ty.has_zoc());
        ty.zoc = Some(true);
        assert!(ty.has_zoc());
    }

    #[test]
    fn test_load_era_from_ron() {
        let text = r#"EraData(
            id: "test_era",
            races: [Race(id: "human", male_names: ["Aldric"])],
            types: [UnitType(
                id: "peasant",
                name: "Peasant",
                race: "human",
                hitpoints: 22,
                movement: 5,
            )],
        )"#;
        let mut registry = TypeRegistry::new();
        registry.load_era_str("inline", text).unwrap();
        assert!(registry.contains("peasant"));
        assert_eq!(registry.resolve("peasant").unwrap().hitpoints, 22);
        assert!(registry.race("human").is_some());
    }

    #[test]
    fn test_load_era_rejects_bad_ron() {
        let mut registry = TypeRegistry::new();
        let err = registry.load_era_str("broken.ron", "EraData(").unwrap_err();
        assert!(matches!(
            err,
            crate::error::GameError::DataParseError { path, .. } if path == "broken.ron"
        ));
    }
}
