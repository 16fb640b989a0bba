//! The mutable in-game unit.
//!
//! A unit is constructed either from a type template (spawn) or from an
//! attribute-store snapshot (load); both paths funnel through
//! [`Unit::advance_to`], which resolves the template, re-derives every
//! type-dependent field and re-applies the modification ledger.
//!
//! Derived lookups (terrain movement cost, terrain defense, concealment)
//! are memoized in interior-mutability caches owned by the unit; every
//! mutation path that can invalidate one clears it before the next read.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, warn};

use crate::attack::Attack;
use crate::attr::{parse_leading_int, Attrs};
use crate::board::{Direction, Location};
use crate::error::{GameError, Result};
use crate::filter::list_contains;
use crate::modification::{ModKind, Modification, ModificationLedger};
use crate::rng::{draw, RandomSource};
use crate::terrain::{TerrainCatalog, TerrainId, TerrainToken, UNREACHABLE};
use crate::unit_type::{Alignment, Gender, TypeRegistry, UnitType};

/// Persistent underlying ids count up from 1.
static NEXT_UNDERLYING_ID: AtomicU64 = AtomicU64::new(1);

/// Clone ids count down from the top so the two spaces never collide.
static NEXT_CLONE_ID: AtomicU64 = AtomicU64::new(u64::MAX);

fn next_underlying_id() -> u64 {
    NEXT_UNDERLYING_ID.fetch_add(1, Ordering::Relaxed)
}

fn next_clone_id() -> u64 {
    NEXT_CLONE_ID.fetch_sub(1, Ordering::Relaxed)
}

/// Attribute sections governed by the modification ledger; restored from
/// the base type by [`Unit::reset_modifications`].
pub(crate) const MOD_SECTIONS: [&str; 4] = ["movement_costs", "defense", "resistance", "abilities"];

/// A single combat unit.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Carrier document: abilities/defense/resistance/movement_costs
    /// sections, profile and upkeep keys, and every unrecognized key from
    /// the snapshot (round-tripped unchanged).
    pub(crate) attrs: Attrs,

    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) underlying_id: u64,

    pub(crate) type_id: String,
    pub(crate) type_name: String,
    pub(crate) race: String,
    pub(crate) variation: String,
    pub(crate) gender: Gender,
    pub(crate) side: u32,

    pub(crate) level: i32,
    pub(crate) alignment: Alignment,
    pub(crate) hitpoints: i32,
    pub(crate) max_hitpoints: i32,
    pub(crate) experience: i32,
    pub(crate) max_experience: i32,
    pub(crate) movement: i32,
    pub(crate) max_movement: i32,
    pub(crate) attacks: Vec<Attack>,
    pub(crate) attacks_left: i32,
    pub(crate) max_attacks: i32,
    pub(crate) zone_of_control: bool,
    pub(crate) flying: bool,
    pub(crate) can_recruit: bool,
    pub(crate) cost: i32,
    pub(crate) is_fearless: bool,
    pub(crate) is_healthy: bool,

    pub(crate) role: String,
    pub(crate) ai_special: String,
    pub(crate) image_mods: String,
    pub(crate) facing: Direction,
    pub(crate) goto_loc: Option<Location>,
    pub(crate) interrupted_move: Option<Location>,
    pub(crate) advances_to: Vec<String>,

    /// Open set of named status flags; absence means not in effect.
    pub(crate) states: BTreeMap<String, String>,

    pub(crate) modifications: ModificationLedger,
    pub(crate) traits_description: String,
    pub(crate) modification_descriptions: BTreeMap<ModKind, String>,

    pub(crate) resting: bool,
    pub(crate) hold_position: bool,
    pub(crate) user_end_turn: bool,

    // Lazily populated lookup caches. Never serialized; rebuilt on demand.
    pub(crate) movement_cost_cache: RefCell<BTreeMap<TerrainId, i32>>,
    pub(crate) defense_cache: RefCell<BTreeMap<TerrainId, i32>>,
    pub(crate) invisibility_cache: RefCell<BTreeMap<Location, bool>>,
}

impl Unit {
    fn blank() -> Self {
        Self {
            attrs: Attrs::new(),
            id: String::new(),
            name: String::new(),
            underlying_id: 0,
            type_id: String::new(),
            type_name: String::new(),
            race: String::new(),
            variation: String::new(),
            gender: Gender::Male,
            side: 1,
            level: 0,
            alignment: Alignment::Neutral,
            hitpoints: 0,
            max_hitpoints: 0,
            experience: 0,
            max_experience: 0,
            movement: 0,
            max_movement: 0,
            attacks: Vec::new(),
            attacks_left: 0,
            max_attacks: 0,
            zone_of_control: false,
            flying: false,
            can_recruit: false,
            cost: 0,
            is_fearless: false,
            is_healthy: false,
            role: String::new(),
            ai_special: String::new(),
            image_mods: String::new(),
            facing: Direction::SouthEast,
            goto_loc: None,
            interrupted_move: None,
            advances_to: Vec::new(),
            states: BTreeMap::new(),
            modifications: ModificationLedger::new(),
            traits_description: String::new(),
            modification_descriptions: BTreeMap::new(),
            resting: false,
            hold_position: false,
            user_end_turn: false,
            movement_cost_cache: RefCell::new(BTreeMap::new()),
            defense_cache: RefCell::new(BTreeMap::new()),
            invisibility_cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// Spawn a unit from a type template.
    ///
    /// `gender: None` rolls a gender from the type's list (through `rng`
    /// when supplied); `Some` forces one, as temporary/scripted placements
    /// do. With `use_traits` the unit rolls its full trait set and a
    /// generated name; without it only musthave traits are granted.
    ///
    /// # Errors
    ///
    /// Propagates [`GameError::UnknownUnitType`] from type-changing
    /// effects in the unit's modification ledger.
    pub fn from_type(
        registry: &TypeRegistry,
        ty: &UnitType,
        side: u32,
        use_traits: bool,
        gender: Option<Gender>,
        variation: &str,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<Self> {
        let mut unit = Self::blank();
        unit.side = side;
        unit.variation = variation.to_string();
        unit.attrs.set("upkeep", "full");
        unit.gender = match gender {
            Some(g) => g,
            None => unit.generate_gender(ty, use_traits, rng.as_deref_mut()),
        };
        unit.advance_to(ty, use_traits, registry, rng.as_deref_mut())?;
        if use_traits {
            // Units that don't get traits are generic rank and file; they
            // don't get personal names either.
            if let Some(race) = registry.race(&unit.race) {
                unit.name = race.generate_name(unit.gender, rng.as_deref_mut());
            }
        }
        unit.generate_traits(!use_traits, registry, rng.as_deref_mut())?;
        unit.reset_modifications(registry)?;
        unit.apply_modifications(registry, rng)?;
        if unit.id.is_empty() {
            unit.id = unit.type_id.clone();
        }
        unit.underlying_id = next_underlying_id();
        Ok(unit)
    }

    /// Reconstruct a unit from an attribute-store snapshot.
    ///
    /// Unknown keys and sections in the snapshot are carried and written
    /// back unchanged.
    ///
    /// # Errors
    ///
    /// [`GameError::InvalidSnapshot`] when the `type` key is missing and
    /// [`GameError::UnknownUnitType`] when it does not resolve; both abort
    /// the load rather than produce a half-initialized unit.
    pub fn from_snapshot(
        registry: &TypeRegistry,
        snapshot: &Attrs,
        use_traits: bool,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<Self> {
        let type_id = snapshot.get_text("type");
        if type_id.is_empty() {
            return Err(GameError::InvalidSnapshot(
                "no 'type' key (probably empty)".to_string(),
            ));
        }
        let ty = registry.resolve(&type_id)?;

        let mut unit = Self::blank();
        unit.type_id = type_id.clone();
        unit.attrs = snapshot.clone();
        unit.side = snapshot.get_int("side", 1).max(1) as u32;
        unit.hitpoints = 1;

        let gender_key = snapshot.get_text("gender");
        unit.gender = if gender_key.is_empty() {
            let roll = unit.attrs.get_bool("random_gender", false);
            unit.generate_gender(ty, roll, rng.as_deref_mut())
        } else {
            Gender::parse(&gender_key).unwrap_or(Gender::Male)
        };
        unit.variation = snapshot.get_text("variation");

        unit.id = {
            let id = snapshot.get_text("id");
            if id.is_empty() {
                type_id.clone()
            } else {
                id
            }
        };
        unit.name = snapshot.get_text("name");
        unit.underlying_id = {
            let stored = snapshot.get_int("underlying_id", 0);
            if stored > 0 {
                stored as u64
            } else {
                next_underlying_id()
            }
        };
        unit.role = snapshot.get_text("role");
        unit.ai_special = snapshot.get_text("ai_special");
        unit.can_recruit = snapshot.get_bool("canrecruit", false);
        unit.facing =
            Direction::parse(&snapshot.get_text("facing")).unwrap_or(Direction::SouthEast);

        if let Some(mods) = snapshot.child("modifications") {
            unit.modifications = ModificationLedger::from_attrs(mods);
            unit.attrs.clear_children("modifications");
        }

        unit.advance_to(ty, use_traits, registry, rng.as_deref_mut())?;

        // Snapshot overrides on top of the re-resolved type.
        let race = snapshot.get_text("race");
        if !race.is_empty() {
            unit.race = race;
        }
        unit.level = snapshot.get_int("level", i64::from(unit.level)) as i32;
        if snapshot.contains("max_attacks") {
            unit.max_attacks = snapshot.get_int("max_attacks", 1).max(0) as i32;
        }
        unit.attacks_left = snapshot
            .get_int("attacks_left", i64::from(unit.max_attacks))
            .max(0) as i32;
        if snapshot.contains("zoc") {
            unit.zone_of_control = snapshot.get_bool("zoc", unit.zone_of_control);
        }
        if snapshot.contains("flying") {
            unit.flying = snapshot.get_bool("flying", unit.flying);
        }
        if snapshot.contains("cost") {
            unit.cost = snapshot.get_int("cost", i64::from(unit.cost)) as i32;
        }
        unit.max_hitpoints = snapshot
            .get_int("max_hitpoints", i64::from(unit.max_hitpoints))
            .max(1) as i32;
        unit.max_movement = snapshot
            .get_int("max_moves", i64::from(unit.max_movement))
            .max(0) as i32;
        unit.max_experience = snapshot
            .get_int("max_experience", i64::from(unit.max_experience))
            .max(1) as i32;

        let advances = snapshot.get_text("advances_to");
        if advances == "null" {
            unit.advances_to.clear();
        } else if !advances.is_empty() {
            unit.advances_to = advances.split(',').map(|s| s.trim().to_string()).collect();
        }

        // A snapshot with its own attacks overrides the type's.
        let own_attacks: Vec<Attack> = snapshot.children("attack").map(Attack::from_attrs).collect();
        if !own_attacks.is_empty() {
            unit.attacks = own_attacks;
        }
        unit.attrs.clear_children("attack");

        // Same for the modification-governed sections.
        for section in MOD_SECTIONS {
            let mut own = snapshot.children(section);
            if let Some(first) = own.next() {
                let mut combined = first.clone();
                for more in own {
                    combined.merge_with(more);
                }
                unit.attrs.clear_children(section);
                unit.attrs.add_child(section, combined);
            }
        }
        unit.movement_cost_cache.borrow_mut().clear();
        unit.defense_cache.borrow_mut().clear();

        if let Some(status) = snapshot.child("status") {
            for (key, value) in status.values() {
                unit.states.insert(key.to_string(), value.to_text());
            }
            unit.attrs.clear_children("status");
        }
        if unit.ai_special == "guardian" {
            unit.set_state("guardian", "yes");
        }

        unit.hitpoints = if snapshot.contains("hitpoints") {
            snapshot.get_int("hitpoints", 1) as i32
        } else {
            unit.max_hitpoints
        };

        let goto_x = snapshot.get_int("goto_x", 0);
        let goto_y = snapshot.get_int("goto_y", 0);
        unit.goto_loc = if goto_x > 0 && goto_y > 0 {
            Some(Location::new(goto_x as i32 - 1, goto_y as i32 - 1))
        } else {
            None
        };

        if snapshot.contains("moves") {
            unit.movement = snapshot.get_int("moves", 0) as i32;
            if unit.movement < 0 {
                unit.attacks_left = 0;
                unit.movement = 0;
            }
        } else {
            unit.movement = unit.max_movement;
        }
        unit.experience = snapshot.get_int("experience", 0) as i32;
        unit.resting = snapshot.get_bool("resting", false);
        if snapshot.contains("alignment") {
            unit.alignment = Alignment::parse(&snapshot.get_text("alignment"));
        }

        if snapshot.get_bool("generate_name", false) {
            if let Some(race) = registry.race(&unit.race) {
                unit.name = race.generate_name(unit.gender, rng.as_deref_mut());
            }
            unit.attrs.set("generate_name", "");
        }

        if unit.attrs.get_text("upkeep").is_empty() {
            unit.attrs.set("upkeep", "full");
        }
        Ok(unit)
    }

    /// Write the unit into a snapshot document.
    ///
    /// Keys the engine does not model flow back out of the carrier
    /// document untouched. A pre-existing `x`/`y` pair on `out` (the
    /// placement, owned by the container) is preserved.
    pub fn write(&self, out: &mut Attrs) {
        let x = out.get("x").cloned();
        let y = out.get("y").cloned();
        out.merge_with(&self.attrs);
        match x {
            Some(v) => out.set("x", v),
            None => out.remove("x"),
        }
        match y {
            Some(v) => out.set("y", v),
            None => out.remove("y"),
        }

        out.set("type", self.type_id.as_str());
        out.set("id", self.id.as_str());
        out.set("name", self.name.as_str());
        out.set("underlying_id", self.underlying_id);
        out.set("type_name", self.type_name.as_str());
        out.set("race", self.race.as_str());
        out.set("variation", self.variation.as_str());
        out.set("gender", self.gender.as_str());
        out.set("side", i64::from(self.side));
        out.set("level", self.level);
        out.set("alignment", self.alignment.as_str());
        out.set("hitpoints", self.hitpoints);
        out.set("max_hitpoints", self.max_hitpoints);
        out.set("experience", self.experience);
        out.set("max_experience", self.max_experience);
        out.set("moves", self.movement);
        out.set("max_moves", self.max_movement);
        out.set("attacks_left", self.attacks_left);
        out.set("max_attacks", self.max_attacks);
        out.set("zoc", self.zone_of_control);
        out.set("flying", self.flying);
        out.set("cost", self.cost);
        out.set("resting", self.resting);
        out.set("role", self.role.as_str());
        out.set("ai_special", self.ai_special.as_str());
        out.set("facing", self.facing.as_str());
        out.set("advances_to", self.advances_to.join(","));
        if self.can_recruit {
            out.set("canrecruit", true);
        }
        let goto = self.goto_loc.map_or((0, 0), |l| (l.x + 1, l.y + 1));
        out.set("goto_x", goto.0);
        out.set("goto_y", goto.1);

        out.clear_children("status");
        let mut status = Attrs::new();
        for (key, value) in &self.states {
            status.set(key, value.as_str());
        }
        out.add_child("status", status);

        out.clear_children("modifications");
        out.add_child("modifications", self.modifications.to_attrs());

        out.clear_children("attack");
        for attack in &self.attacks {
            out.add_child("attack", attack.to_attrs());
        }
    }

    /// Roll (or default) a gender from the type's list.
    ///
    /// Latches `random_gender` off so a restored unit never re-rolls.
    pub(crate) fn generate_gender(
        &mut self,
        ty: &UnitType,
        roll: bool,
        rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Gender {
        self.attrs.set("random_gender", "no");
        if ty.genders.is_empty() {
            Gender::Male
        } else if roll {
            ty.genders[draw(rng) as usize % ty.genders.len()]
        } else {
            ty.genders[0]
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Stable string id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Personal display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the unit.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Process-unique numeric id (stable across snapshots).
    #[must_use]
    pub fn underlying_id(&self) -> u64 {
        self.underlying_id
    }

    /// Re-stamp the unit with a clone id.
    ///
    /// Used for transient placements; clone ids are drawn from a counter
    /// space disjoint from persistent ids, so a copy can never collide
    /// with the original.
    pub fn assign_clone_id(&mut self) {
        self.underlying_id = next_clone_id();
    }

    /// Current type id.
    #[must_use]
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Type display name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Race id.
    #[must_use]
    pub fn race(&self) -> &str {
        &self.race
    }

    /// Variation name, empty for the base form.
    #[must_use]
    pub fn variation(&self) -> &str {
        &self.variation
    }

    /// Gender.
    #[must_use]
    pub fn gender(&self) -> Gender {
        self.gender
    }

    /// Owning side (numbered from 1).
    #[must_use]
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Change the owning side.
    pub fn set_side(&mut self, side: u32) {
        self.side = side;
    }

    /// Level.
    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Alignment.
    #[must_use]
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Current hitpoints.
    #[must_use]
    pub fn hitpoints(&self) -> i32 {
        self.hitpoints
    }

    /// Maximum hitpoints.
    #[must_use]
    pub fn max_hitpoints(&self) -> i32 {
        self.max_hitpoints
    }

    /// Current experience.
    #[must_use]
    pub fn experience(&self) -> i32 {
        self.experience
    }

    /// Experience needed to advance.
    #[must_use]
    pub fn max_experience(&self) -> i32 {
        self.max_experience
    }

    /// Movement points left this turn.
    #[must_use]
    pub fn movement_left(&self) -> i32 {
        self.movement
    }

    /// Movement points per turn.
    #[must_use]
    pub fn total_movement(&self) -> i32 {
        self.max_movement
    }

    /// Set remaining movement, clamped to `[0, total_movement]`.
    pub fn set_movement(&mut self, moves: i32) {
        self.hold_position = false;
        self.user_end_turn = false;
        self.movement = moves.clamp(0, self.max_movement);
    }

    /// Attack list.
    #[must_use]
    pub fn attacks(&self) -> &[Attack] {
        &self.attacks
    }

    /// Attacks remaining this turn.
    #[must_use]
    pub fn attacks_left(&self) -> i32 {
        self.attacks_left
    }

    /// Attacks allowed per turn.
    #[must_use]
    pub fn max_attacks(&self) -> i32 {
        self.max_attacks
    }

    /// Set attacks remaining this turn (floored at zero).
    pub fn set_attacks_left(&mut self, left: i32) {
        self.attacks_left = left.max(0);
    }

    /// Whether the unit exerts a zone of control.
    #[must_use]
    pub fn emits_zoc(&self) -> bool {
        self.zone_of_control
    }

    /// Whether the unit flies.
    #[must_use]
    pub fn is_flying(&self) -> bool {
        self.flying
    }

    /// Whether the unit can recruit (is a leader).
    #[must_use]
    pub fn can_recruit(&self) -> bool {
        self.can_recruit
    }

    /// Mark or unmark the unit as a leader.
    pub fn set_can_recruit(&mut self, can: bool) {
        self.can_recruit = can;
    }

    /// Gold value.
    #[must_use]
    pub fn cost(&self) -> i32 {
        self.cost
    }

    /// Whether a `fearless` trait is in effect.
    #[must_use]
    pub fn is_fearless(&self) -> bool {
        self.is_fearless
    }

    /// Whether a `healthy` trait is in effect.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }

    /// AI role tag.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Assign the AI role tag.
    pub fn set_role(&mut self, role: impl Into<String>) {
        self.role = role.into();
    }

    /// AI special tag (e.g. `guardian`).
    #[must_use]
    pub fn ai_special(&self) -> &str {
        &self.ai_special
    }

    /// Image modification chain for the rendering layer.
    #[must_use]
    pub fn image_mods(&self) -> &str {
        &self.image_mods
    }

    /// Facing direction.
    #[must_use]
    pub fn facing(&self) -> Direction {
        self.facing
    }

    /// Turn the unit.
    pub fn set_facing(&mut self, dir: Direction) {
        self.facing = dir;
    }

    /// Long-move destination, if one is queued.
    #[must_use]
    pub fn goto_loc(&self) -> Option<Location> {
        self.goto_loc
    }

    /// Queue or clear a long-move destination.
    pub fn set_goto(&mut self, loc: Option<Location>) {
        self.goto_loc = loc;
    }

    /// Where an interrupted multi-turn move stopped.
    #[must_use]
    pub fn interrupted_move(&self) -> Option<Location> {
        self.interrupted_move
    }

    /// Record or clear an interrupted move.
    pub fn set_interrupted_move(&mut self, loc: Option<Location>) {
        self.interrupted_move = loc;
    }

    /// Types this unit advances to.
    #[must_use]
    pub fn advances_to(&self) -> &[String] {
        &self.advances_to
    }

    /// Whether the unit is resting (did not act last turn).
    #[must_use]
    pub fn resting(&self) -> bool {
        self.resting
    }

    /// Set the resting flag.
    pub fn set_resting(&mut self, resting: bool) {
        self.resting = resting;
    }

    /// Whether the user asked the unit to hold position.
    #[must_use]
    pub fn hold_position(&self) -> bool {
        self.hold_position
    }

    /// Toggle hold-position; holding also ends the unit's turn.
    pub fn set_hold_position(&mut self, hold: bool) {
        self.hold_position = hold;
        if hold {
            self.user_end_turn = true;
        }
    }

    /// Whether the unit's turn was ended by the user.
    #[must_use]
    pub fn user_end_turn(&self) -> bool {
        self.user_end_turn
    }

    /// End (or un-end) the unit's turn on the user's behalf.
    pub fn set_user_end_turn(&mut self, end: bool) {
        self.user_end_turn = end;
    }

    /// The modification ledger.
    #[must_use]
    pub fn modifications(&self) -> &ModificationLedger {
        &self.modifications
    }

    /// Ids of the unit's traits, in grant order.
    #[must_use]
    pub fn traits_list(&self) -> Vec<String> {
        self.modifications.trait_ids()
    }

    /// Human-readable summary of the unit's traits.
    #[must_use]
    pub fn traits_description(&self) -> &str {
        &self.traits_description
    }

    /// Human-readable effect summary for one modification kind.
    #[must_use]
    pub fn modification_description(&self, kind: ModKind) -> &str {
        self.modification_descriptions
            .get(&kind)
            .map_or("", String::as_str)
    }

    /// Read-only view of the carrier document.
    #[must_use]
    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Portrait/profile image reference, if one is set.
    #[must_use]
    pub fn profile(&self) -> &str {
        self.attrs.get_str("profile").unwrap_or("")
    }

    // ========================================================================
    // Status flags
    // ========================================================================

    /// Value of a named status flag; empty when not in effect.
    #[must_use]
    pub fn get_state(&self, state: &str) -> &str {
        self.states.get(state).map_or("", String::as_str)
    }

    /// Boolean reading of a status flag.
    #[must_use]
    pub fn state_bool(&self, state: &str) -> bool {
        crate::attr::string_bool(self.get_state(state), false)
    }

    /// Set a status flag; an empty value clears it.
    ///
    /// Toggling `slowed` invalidates the movement-cost cache. The doubling
    /// itself is applied outside the cache.
    pub fn set_state(&mut self, state: &str, value: &str) {
        let changed = self.get_state(state) != value;
        if value.is_empty() {
            self.states.remove(state);
        } else {
            self.states.insert(state.to_string(), value.to_string());
        }
        if changed && state == "slowed" {
            self.movement_cost_cache.borrow_mut().clear();
        }
    }

    /// Iterate over all active status flags.
    pub fn states(&self) -> impl Iterator<Item = (&str, &str)> {
        self.states.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ========================================================================
    // Abilities
    // ========================================================================

    /// True when an ability with this id is present.
    #[must_use]
    pub fn has_ability_by_id(&self, ability: &str) -> bool {
        match self.attrs.child("abilities") {
            Some(section) => section
                .all_children()
                .any(|(_, body)| body.get_text("id") == ability),
            None => false,
        }
    }

    /// Remove every ability with this id.
    pub fn remove_ability_by_id(&mut self, ability: &str) {
        if let Some(section) = self.attrs.child_mut("abilities") {
            section.retain_children(|_, body| body.get_text("id") != ability);
        }
    }

    /// True when an ability of the given kind (section name, e.g.
    /// `hides`) is present.
    #[must_use]
    pub fn has_ability_kind(&self, kind: &str) -> bool {
        self.attrs
            .child("abilities")
            .is_some_and(|section| section.children(kind).next().is_some())
    }

    // ========================================================================
    // Turn boundaries and healing
    // ========================================================================

    /// Refresh the unit at the start of its side's turn.
    pub fn new_turn(&mut self) {
        self.user_end_turn = false;
        self.movement = self.total_movement();
        self.attacks_left = self.max_attacks;
        // Re-arm concealment; ambushes only reveal until the next turn.
        self.set_state("hidden", "yes");
        if self.hold_position {
            self.user_end_turn = true;
        }
    }

    /// Book-keeping at the end of the unit's side's turn.
    pub fn end_turn(&mut self) {
        self.set_state("slowed", "");
        if self.movement != self.total_movement()
            && !self.state_bool("not_moved")
            && (!self.is_healthy || self.attacks_left < self.max_attacks)
        {
            self.resting = false;
        }
        self.set_state("not_moved", "");
        self.interrupted_move = None;
    }

    /// Post-level-up refresh: drop transient modifications, re-derive,
    /// heal fully and shed combat ailments.
    ///
    /// # Errors
    ///
    /// Propagates type-resolution failures from the re-derivation.
    pub fn new_level(
        &mut self,
        registry: &TypeRegistry,
        rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        self.ai_special.clear();
        self.goto_loc = None;
        self.modifications.remove_temporary();
        self.reset_modifications(registry)?;
        self.apply_modifications(registry, rng)?;
        self.heal_all();
        self.set_state("slowed", "");
        self.set_state("poisoned", "");
        self.set_state("stoned", "");
        Ok(())
    }

    /// Heal by an amount, clamped to `[1, max_hitpoints]`.
    pub fn heal(&mut self, amount: i32) {
        let max_hp = self.max_hitpoints;
        if self.hitpoints < max_hp {
            self.hitpoints += amount;
            if self.hitpoints > max_hp {
                self.hitpoints = max_hp;
            }
        }
        if self.hitpoints < 1 {
            self.hitpoints = 1;
        }
    }

    /// Heal to full.
    pub fn heal_all(&mut self) {
        self.heal(self.max_hitpoints);
    }

    /// Take damage. The unit may reach 0 hitpoints; removal is the
    /// container's decision.
    pub fn take_hit(&mut self, damage: i32) {
        self.hitpoints -= damage.max(0);
    }

    // ========================================================================
    // Upkeep and advancement
    // ========================================================================

    /// Per-turn upkeep cost. Leaders and loyal units are free.
    #[must_use]
    pub fn upkeep(&self) -> i32 {
        if self.can_recruit {
            return 0;
        }
        match self.attrs.get_text("upkeep").as_str() {
            "full" => self.level,
            "loyal" => 0,
            other => parse_leading_int(other).unwrap_or(0) as i32,
        }
    }

    /// Whether the unit can still advance (regular or AMLA).
    #[must_use]
    pub fn can_advance(&self, registry: &TypeRegistry) -> bool {
        if !self.advances_to.is_empty() {
            return true;
        }
        !self.available_advancements(registry).is_empty()
    }

    /// AMLA advancements currently available to this unit.
    ///
    /// Honors `strict_amla` (only when no regular advancement remains),
    /// `max_times`, and `require_amla` prerequisite counts.
    #[must_use]
    pub fn available_advancements<'a>(&self, registry: &'a TypeRegistry) -> Vec<&'a Modification> {
        let Some(ty) = registry.get(&self.type_id) else {
            return Vec::new();
        };
        let ty = ty.variant(self.gender, &self.variation);
        let mut available = Vec::new();
        for adv in &ty.advancements {
            if adv.strict_amla && !self.advances_to.is_empty() {
                continue;
            }
            if (self.modifications.count(ModKind::Advance, &adv.id) as i64) >= adv.max_times {
                continue;
            }
            let mut unique: Vec<&String> = adv.require_amla.iter().collect();
            unique.sort();
            unique.dedup();
            let satisfied = unique.into_iter().all(|req| {
                let required = adv.require_amla.iter().filter(|r| *r == req).count();
                self.modifications.count(ModKind::Advance, req) >= required
            });
            if satisfied {
                available.push(adv);
            }
        }
        available
    }

    // ========================================================================
    // Terrain-cost cache
    // ========================================================================

    /// Movement cost to enter a terrain.
    ///
    /// Memoized per terrain id; the `slowed` doubling is applied outside
    /// the cache. Unconfigured terrain is impassable ([`UNREACHABLE`]).
    #[must_use]
    pub fn movement_cost(&self, terrain: &TerrainId, catalog: &dyn TerrainCatalog) -> i32 {
        let cost = self.movement_cost_internal(terrain, catalog, 0);
        if self.state_bool("slowed") {
            return cost * 2;
        }
        cost
    }

    fn movement_cost_internal(
        &self,
        terrain: &TerrainId,
        catalog: &dyn TerrainCatalog,
        recurse_count: u32,
    ) -> i32 {
        if let Some(&cached) = self.movement_cost_cache.borrow().get(terrain) {
            return cached;
        }

        let underlying = catalog.underlying_movement(terrain);
        let atomic = underlying.len() == 1
            && matches!(&underlying[0], TerrainToken::Terrain(t) if t == terrain);
        if !atomic {
            // Alias: fold the underlying terrains under the PLUS/MINUS
            // revert flag, best-in-direction.
            let mut revert = matches!(underlying.first(), Some(TerrainToken::Minus));
            if recurse_count >= 100 {
                return UNREACHABLE;
            }
            let mut ret = if revert { 0 } else { UNREACHABLE };
            for token in &underlying {
                match token {
                    TerrainToken::Plus => revert = false,
                    TerrainToken::Minus => revert = true,
                    TerrainToken::Terrain(t) => {
                        let value = self.movement_cost_internal(t, catalog, recurse_count + 1);
                        if value < ret && !revert {
                            ret = value;
                        } else if value > ret && revert {
                            ret = value;
                        }
                    }
                }
            }
            self.movement_cost_cache
                .borrow_mut()
                .insert(terrain.clone(), ret);
            return ret;
        }

        let mut res = -1;
        if let Some(costs) = self.attrs.child("movement_costs") {
            let id = catalog.display_id(terrain);
            if !costs.get_text(&id).is_empty() {
                res = costs.get_int(&id, -1) as i32;
            }
        }
        if res <= 0 {
            res = UNREACHABLE;
        }
        self.movement_cost_cache
            .borrow_mut()
            .insert(terrain.clone(), res);
        res
    }

    /// Defense modifier on a terrain: the percent chance to be hit.
    ///
    /// Memoized per terrain id. 100 is the worst defense; unconfigured
    /// terrain defends at 0%.
    #[must_use]
    pub fn defense_modifier(&self, terrain: &TerrainId, catalog: &dyn TerrainCatalog) -> i32 {
        self.defense_modifier_internal(terrain, catalog, 0)
    }

    fn defense_modifier_internal(
        &self,
        terrain: &TerrainId,
        catalog: &dyn TerrainCatalog,
        recurse_count: u32,
    ) -> i32 {
        if let Some(&cached) = self.defense_cache.borrow().get(terrain) {
            return cached;
        }

        let underlying = catalog.underlying_defense(terrain);
        let atomic = underlying.len() == 1
            && matches!(&underlying[0], TerrainToken::Terrain(t) if t == terrain);
        if !atomic {
            let mut revert = matches!(underlying.first(), Some(TerrainToken::Minus));
            if recurse_count >= 90 {
                // Early warning before the hard cutoff at 100.
                error!(terrain = %terrain, depth = recurse_count, "runaway defense_modifier recursion");
            }
            if recurse_count >= 100 {
                return 100;
            }
            let mut ret = if revert { 0 } else { 100 };
            for token in &underlying {
                match token {
                    TerrainToken::Plus => revert = false,
                    TerrainToken::Minus => revert = true,
                    TerrainToken::Terrain(t) => {
                        let value = self.defense_modifier_internal(t, catalog, recurse_count + 1);
                        if value < ret && !revert {
                            ret = value;
                        } else if value > ret && revert {
                            ret = value;
                        }
                    }
                }
            }
            self.defense_cache.borrow_mut().insert(terrain.clone(), ret);
            return ret;
        }

        let id = catalog.display_id(terrain);
        let configured = self
            .attrs
            .child("defense")
            .map(|section| section.get_text(&id))
            .filter(|text| !text.is_empty());
        let res = match configured {
            None => 0,
            Some(text) => {
                let value = parse_leading_int(&text).unwrap_or(0) as i32;
                if value <= 0 {
                    warn!(terrain = %terrain, value, "non-positive defense, clamping to 0");
                    0
                } else {
                    value
                }
            }
        };
        self.defense_cache.borrow_mut().insert(terrain.clone(), res);
        res
    }

    // ========================================================================
    // Resistance
    // ========================================================================

    /// Base per-damage-type resistance table (incoming damage percents).
    #[must_use]
    pub fn base_resistances(&self) -> Attrs {
        self.attrs.child("resistance").cloned().unwrap_or_default()
    }

    /// Incoming damage percentage for a damage type, after base
    /// resistance and matching `resistance` abilities.
    #[must_use]
    pub fn resistance_against(&self, damage_type: &str, attacker: bool) -> i32 {
        let mut res = 0;
        if let Some(section) = self.attrs.child("resistance") {
            if !section.get_text(damage_type).is_empty() {
                res = 100 - section.get_int(damage_type, 100) as i32;
            }
        }
        if let Some(abilities) = self.attrs.child("abilities") {
            for body in abilities.children("resistance") {
                if !resistance_filter_matches(body, attacker, damage_type) {
                    continue;
                }
                if body.contains("value") {
                    let incoming = body.get_int("value", 100) as i32;
                    res = res.max(100 - incoming);
                }
            }
        }
        100 - res
    }
}

/// Whether a resistance ability applies on this side of a fight and to
/// this damage type.
fn resistance_filter_matches(body: &Attrs, attacker: bool, damage_type: &str) -> bool {
    let active_on = body.get_text("active_on");
    let side_ok = active_on.is_empty()
        || (attacker && active_on == "offense")
        || (!attacker && active_on == "defense");
    if !side_ok {
        return false;
    }
    let apply_to = body.get_text("apply_to");
    apply_to.is_empty() || list_contains(&apply_to, damage_type)
}

/// Recall-list ordering: higher level first, then closest to advancing.
pub fn sort_units(units: &mut [Unit]) {
    units.sort_by(|a, b| {
        b.level().cmp(&a.level()).then_with(|| {
            let xp_a = a.max_experience() - a.experience();
            let xp_b = b.max_experience() - b.experience();
            xp_a.cmp(&xp_b)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::{TerrainDef, TerrainTable};

    fn basic_type() -> UnitType {
        UnitType {
            id: "spearman".to_string(),
            name: "Spearman".to_string(),
            race: "human".to_string(),
            hitpoints: 30,
            movement: 5,
            level: 1,
            attacks: vec![Attack {
                id: "spear".to_string(),
                name: "spear".to_string(),
                attack_type: "pierce".to_string(),
                range: "melee".to_string(),
                damage: 7,
                number: 3,
            }],
            ..UnitType::default()
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.insert_type(basic_type());
        registry
    }

    fn spawn(registry: &TypeRegistry) -> Unit {
        let ty = registry.resolve("spearman").unwrap();
        Unit::from_type(registry, ty, 1, false, None, "", None).unwrap()
    }

    #[test]
    fn test_spawn_derives_stats_from_type() {
        let registry = registry();
        let unit = spawn(&registry);
        assert_eq!(unit.hitpoints(), 30);
        assert_eq!(unit.max_hitpoints(), 30);
        assert_eq!(unit.total_movement(), 5);
        assert_eq!(unit.level(), 1);
        assert!(unit.emits_zoc());
        assert_eq!(unit.attacks().len(), 1);
        assert!(unit.underlying_id() > 0);
    }

    #[test]
    fn test_underlying_ids_are_unique_and_clone_ids_disjoint() {
        let registry = registry();
        let a = spawn(&registry);
        let b = spawn(&registry);
        assert_ne!(a.underlying_id(), b.underlying_id());

        let mut copy = a.clone();
        copy.assign_clone_id();
        assert_ne!(copy.underlying_id(), a.underlying_id());
        assert!(copy.underlying_id() > u64::MAX / 2);
        assert!(a.underlying_id() < u64::MAX / 2);
    }

    #[test]
    fn test_heal_clamps_to_bounds() {
        let registry = registry();
        let mut unit = spawn(&registry);
        unit.take_hit(40);
        assert!(unit.hitpoints() <= 0);
        unit.heal(5);
        assert!(unit.hitpoints() >= 1);
        unit.heal_all();
        assert_eq!(unit.hitpoints(), unit.max_hitpoints());
        unit.heal(10);
        assert_eq!(unit.hitpoints(), unit.max_hitpoints());
    }

    #[test]
    fn test_new_turn_refreshes_and_rearms_hidden() {
        let registry = registry();
        let mut unit = spawn(&registry);
        unit.set_movement(0);
        unit.set_attacks_left(0);
        unit.new_turn();
        assert_eq!(unit.movement_left(), unit.total_movement());
        assert_eq!(unit.attacks_left(), unit.max_attacks());
        assert!(unit.state_bool("hidden"));
    }

    #[test]
    fn test_end_turn_clears_slow() {
        let registry = registry();
        let mut unit = spawn(&registry);
        unit.set_state("slowed", "yes");
        unit.end_turn();
        assert!(!unit.state_bool("slowed"));
    }

    #[test]
    fn test_status_flags_are_an_open_set() {
        let registry = registry();
        let mut unit = spawn(&registry);
        assert_eq!(unit.get_state("poisoned"), "");
        unit.set_state("poisoned", "yes");
        assert!(unit.state_bool("poisoned"));
        unit.set_state("poisoned", "");
        assert!(!unit.state_bool("poisoned"));
    }

    #[test]
    fn test_movement_cost_defaults_to_impassable_and_caches() {
        let registry = registry();
        let mut unit = spawn(&registry);
        let table = TerrainTable::new();
        let swamp = TerrainId::new("Ss");
        assert_eq!(unit.movement_cost(&swamp, &table), UNREACHABLE);

        // Configure a cost and confirm the stale cache would mask it
        // until cleared by the ledger path.
        let mut costs = Attrs::new();
        costs.set("Ss", 3);
        unit.attrs.clear_children("movement_costs");
        unit.attrs.add_child("movement_costs", costs);
        assert_eq!(unit.movement_cost(&swamp, &table), UNREACHABLE);
        unit.movement_cost_cache.borrow_mut().clear();
        assert_eq!(unit.movement_cost(&swamp, &table), 3);
    }

    #[test]
    fn test_slowed_doubles_movement_cost_outside_cache() {
        let registry = registry();
        let mut unit = spawn(&registry);
        let table = TerrainTable::new();
        let grass = TerrainId::new("Gg");
        let mut costs = Attrs::new();
        costs.set("Gg", 2);
        unit.attrs.add_child("movement_costs", costs);

        assert_eq!(unit.movement_cost(&grass, &table), 2);
        unit.set_state("slowed", "yes");
        assert_eq!(unit.movement_cost(&grass, &table), 4);
        unit.set_state("slowed", "");
        assert_eq!(unit.movement_cost(&grass, &table), 2);
    }

    #[test]
    fn test_defense_missing_is_zero_and_negative_clamped() {
        let registry = registry();
        let mut unit = spawn(&registry);
        let table = TerrainTable::new();
        assert_eq!(unit.defense_modifier(&TerrainId::new("Gg"), &table), 0);

        let mut defense = Attrs::new();
        defense.set("Hh", -30);
        defense.set("Ff", 50);
        unit.attrs.add_child("defense", defense);
        unit.defense_cache.borrow_mut().clear();
        assert_eq!(unit.defense_modifier(&TerrainId::new("Hh"), &table), 0);
        assert_eq!(unit.defense_modifier(&TerrainId::new("Ff"), &table), 50);
    }

    #[test]
    fn test_alias_fold_plus_minus() {
        let registry = registry();
        let mut unit = spawn(&registry);

        let mut table = TerrainTable::new();
        table.insert(
            TerrainId::new("alias"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("A")),
                    TerrainToken::Minus,
                    TerrainToken::Terrain(TerrainId::new("B")),
                    TerrainToken::Terrain(TerrainId::new("C")),
                ],
                def_alias: Vec::new(),
            },
        );
        let mut costs = Attrs::new();
        costs.set("A", 2);
        costs.set("B", 5);
        costs.set("C", 3);
        unit.attrs.add_child("movement_costs", costs);

        // A under PLUS keeps min(inf, 2) = 2; MINUS then takes the max
        // over B and C: max(2, 5, 3) = 5.
        assert_eq!(unit.movement_cost(&TerrainId::new("alias"), &table), 5);
    }

    #[test]
    fn test_alias_cycle_hits_recursion_sentinel() {
        let registry = registry();
        let unit = spawn(&registry);
        let mut table = TerrainTable::new();
        table.insert(
            TerrainId::new("X"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("Y")),
                    TerrainToken::Terrain(TerrainId::new("Z")),
                ],
                def_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("Y")),
                    TerrainToken::Terrain(TerrainId::new("Z")),
                ],
            },
        );
        table.insert(
            TerrainId::new("Y"),
            TerrainDef {
                display: String::new(),
                mvt_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("X")),
                    TerrainToken::Terrain(TerrainId::new("Z")),
                ],
                def_alias: vec![
                    TerrainToken::Terrain(TerrainId::new("X")),
                    TerrainToken::Terrain(TerrainId::new("Z")),
                ],
            },
        );
        // Terminates at the recursion bound instead of spinning.
        let cost = unit.movement_cost(&TerrainId::new("X"), &table);
        assert_eq!(cost, UNREACHABLE);
        let defense = unit.defense_modifier(&TerrainId::new("X"), &table);
        assert!(defense <= 100);
    }

    #[test]
    fn test_upkeep_levels() {
        let registry = registry();
        let mut unit = spawn(&registry);
        assert_eq!(unit.upkeep(), 1);
        unit.attrs.set("upkeep", "loyal");
        assert_eq!(unit.upkeep(), 0);
        unit.attrs.set("upkeep", "full");
        unit.set_can_recruit(true);
        assert_eq!(unit.upkeep(), 0);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_stats_and_unknown_keys() {
        let registry = registry();
        let mut unit = spawn(&registry);
        unit.set_state("poisoned", "yes");
        unit.attrs.set("scenario_marker", "kept");

        let mut doc = Attrs::new();
        unit.write(&mut doc);
        assert_eq!(doc.get_text("scenario_marker"), "kept");

        let restored = Unit::from_snapshot(&registry, &doc, false, None).unwrap();
        assert_eq!(restored.hitpoints(), unit.hitpoints());
        assert_eq!(restored.max_hitpoints(), unit.max_hitpoints());
        assert_eq!(restored.experience(), unit.experience());
        assert_eq!(restored.total_movement(), unit.total_movement());
        assert_eq!(restored.attacks().len(), unit.attacks().len());
        assert_eq!(restored.underlying_id(), unit.underlying_id());
        assert!(restored.state_bool("poisoned"));
        assert_eq!(restored.attrs().get_text("scenario_marker"), "kept");

        let mut second = Attrs::new();
        restored.write(&mut second);
        assert_eq!(second.get_text("scenario_marker"), "kept");
    }

    #[test]
    fn test_snapshot_without_type_is_rejected() {
        let registry = registry();
        let doc = Attrs::new();
        let err = Unit::from_snapshot(&registry, &doc, false, None).unwrap_err();
        assert!(matches!(err, GameError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_snapshot_with_unknown_type_is_fatal() {
        let registry = registry();
        let mut doc = Attrs::new();
        doc.set("type", "dragon");
        let err = Unit::from_snapshot(&registry, &doc, false, None).unwrap_err();
        assert!(matches!(err, GameError::UnknownUnitType { .. }));
    }

    #[test]
    fn test_sort_units_by_level_then_xp() {
        let registry = registry();
        let mut a = spawn(&registry);
        a.level = 2;
        let mut b = spawn(&registry);
        b.level = 1;
        b.experience = 30;
        b.max_experience = 40;
        let mut c = spawn(&registry);
        c.level = 1;
        c.experience = 0;
        c.max_experience = 40;

        let mut units = vec![c, a, b];
        sort_units(&mut units);
        assert_eq!(units[0].level(), 2);
        assert_eq!(units[1].experience(), 30);
        assert_eq!(units[2].experience(), 0);
    }
}
