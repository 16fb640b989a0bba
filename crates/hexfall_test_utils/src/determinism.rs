//! Determinism testing utilities.
//!
//! Trait rolls, gender rolls and name generation must be reproducible
//! when fed from an injected seeded source - multiplayer replays depend
//! on every client deriving the identical ledger. Sources of
//! non-determinism to watch for:
//!
//! - **Unseeded randomness**: the engine's fallback stream is only legal
//!   outside synchronized contexts; these helpers always inject seeds.
//! - **Map iteration order**: unit state uses sorted maps throughout, so
//!   iteration never depends on hasher randomization.
//! - **Mixed sources**: one decision must draw from one stream; a musthave
//!   grant never draws at all.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use hexfall_core::prelude::*;

/// Result of a trait-determinism run.
#[derive(Debug, Clone)]
pub struct TraitDeterminismResult {
    /// Trait ledgers from each run, in grant order.
    pub ledgers: Vec<Vec<String>>,
    /// Genders from each run.
    pub genders: Vec<Gender>,
}

impl TraitDeterminismResult {
    /// True when every run produced the identical ledger and gender.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.ledgers.windows(2).all(|w| w[0] == w[1])
            && self.genders.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert determinism with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics when any run diverged.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic(),
            "Trait generation diverged across {} identically-seeded runs!\n\
             Ledgers: {:?}\n\
             Genders: {:?}",
            self.ledgers.len(),
            self.ledgers,
            self.genders,
        );
    }
}

/// Build `runs` units of `type_id`, each from a fresh stream with the
/// same seed, and collect their trait ledgers.
///
/// # Panics
///
/// Panics when the fixture type cannot be spawned at all.
#[must_use]
pub fn trait_determinism(
    registry: &TypeRegistry,
    type_id: &str,
    seed: u64,
    runs: usize,
) -> TraitDeterminismResult {
    let mut ledgers = Vec::with_capacity(runs);
    let mut genders = Vec::with_capacity(runs);
    for _ in 0..runs {
        let mut rng = SeededRng::new(seed);
        let ty = registry
            .resolve(type_id)
            .unwrap_or_else(|e| panic!("fixture type missing: {e}"));
        let unit = Unit::from_type(registry, ty, 1, true, None, "", Some(&mut rng))
            .unwrap_or_else(|e| panic!("fixture spawn failed: {e}"));
        ledgers.push(unit.traits_list());
        genders.push(unit.gender());
    }
    TraitDeterminismResult { ledgers, genders }
}

/// Hash the stats a snapshot round-trip must preserve.
///
/// Covers hitpoints, experience, movement, attacks and ability ids - the
/// "effective stats" contract for write-then-read.
#[must_use]
pub fn stat_fingerprint(unit: &Unit) -> u64 {
    let mut hasher = DefaultHasher::new();
    unit.hitpoints().hash(&mut hasher);
    unit.max_hitpoints().hash(&mut hasher);
    unit.experience().hash(&mut hasher);
    unit.max_experience().hash(&mut hasher);
    unit.movement_left().hash(&mut hasher);
    unit.total_movement().hash(&mut hasher);
    unit.level().hash(&mut hasher);
    unit.attacks_left().hash(&mut hasher);
    unit.max_attacks().hash(&mut hasher);
    for attack in unit.attacks() {
        attack.id.hash(&mut hasher);
        attack.damage.hash(&mut hasher);
        attack.number.hash(&mut hasher);
        attack.range.hash(&mut hasher);
        attack.attack_type.hash(&mut hasher);
    }
    if let Some(abilities) = unit.attrs().child("abilities") {
        for (kind, body) in abilities.all_children() {
            kind.hash(&mut hasher);
            body.get_text("id").hash(&mut hasher);
        }
    }
    hasher.finish()
}
