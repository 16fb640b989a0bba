//! The modification ledger and merge engine.
//!
//! A unit's effective stats are derived by merging its base type with an
//! ordered ledger of modification records: advancements, traits and
//! objects, applied in that fixed order. Each record carries a list of
//! [`Effect`]s; each effect targets one aspect of the unit and may filter
//! on type id or gender and repeat (`times`, possibly `"per level"`).
//!
//! Unknown effect kinds are carried but never applied - the
//! forward-compatibility policy for data written by newer versions.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attack::{Attack, AttackEffect, AttackFilter};
use crate::attr::{parse_leading_int, Attrs, Value};

/// The three modification kinds, in ledger grouping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModKind {
    /// Level-up / AMLA advancement records. Applied first.
    Advance,
    /// Trait records. Applied second.
    Trait,
    /// Generic object/equipment records. Applied last.
    Object,
}

impl ModKind {
    /// Fixed application order of the merge engine.
    pub const APPLY_ORDER: [ModKind; 3] = [ModKind::Advance, ModKind::Trait, ModKind::Object];

    /// Section name used in snapshots.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            ModKind::Advance => "advance",
            ModKind::Trait => "trait",
            ModKind::Object => "object",
        }
    }

    /// Parse a snapshot section name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advance" => Some(ModKind::Advance),
            "trait" => Some(ModKind::Trait),
            "object" => Some(ModKind::Object),
            _ => None,
        }
    }
}

/// One typed instruction inside a modification record.
///
/// `unit_type` / `unit_gender` are CSV filters evaluated against the unit
/// before the effect applies; a non-match silently skips this effect
/// without affecting the rest of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Restrict to these unit type ids (CSV).
    #[serde(default)]
    pub unit_type: Option<String>,

    /// Restrict to these genders (CSV of `male`/`female`).
    #[serde(default)]
    pub unit_gender: Option<String>,

    /// Repeat count: a number, or `"per level"` for the unit's level.
    #[serde(default)]
    pub times: Option<String>,

    /// What the effect does.
    pub kind: EffectKind,
}

impl Effect {
    /// Wrap a kind with no filters and a single application.
    #[must_use]
    pub fn of(kind: EffectKind) -> Self {
        Self {
            unit_type: None,
            unit_gender: None,
            times: None,
            kind,
        }
    }
}

/// The closed set of effect targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectKind {
    /// Mutate existing attacks.
    Attack(AttackEffect),
    /// Grant a new attack.
    NewAttack {
        /// The attack to add.
        attack: Attack,
    },
    /// Remove attacks matching a filter.
    RemoveAttacks {
        /// Which attacks to remove.
        #[serde(default)]
        filter: AttackFilter,
    },
    /// Adjust current and/or maximum hitpoints.
    Hitpoints {
        /// Delta applied to current hitpoints.
        #[serde(default)]
        increase: Option<String>,
        /// Delta applied to maximum hitpoints.
        #[serde(default)]
        increase_total: Option<String>,
        /// Absolute (or %-of-max) assignment of current hitpoints.
        #[serde(default)]
        set: Option<String>,
        /// Absolute (or %-of-max) assignment of maximum hitpoints.
        #[serde(default)]
        set_total: Option<String>,
        /// Heal to full after the maximum changed.
        #[serde(default)]
        heal_full: bool,
        /// Allow current hitpoints above the maximum.
        #[serde(default)]
        violate_maximum: bool,
    },
    /// Adjust maximum movement.
    Movement {
        /// Delta applied to maximum movement.
        #[serde(default)]
        increase: Option<String>,
        /// Absolute assignment of maximum movement.
        #[serde(default)]
        set: Option<String>,
    },
    /// Adjust the experience threshold.
    MaxExperience {
        /// Delta applied to the threshold.
        #[serde(default)]
        increase: Option<String>,
    },
    /// Mark the unit loyal (no upkeep).
    Loyal,
    /// Add or remove status flags.
    Status {
        /// Status to set.
        #[serde(default)]
        add: Option<String>,
        /// Status to clear.
        #[serde(default)]
        remove: Option<String>,
    },
    /// Overlay the per-terrain movement cost table.
    MovementCosts {
        /// Terrain-keyed numeric overlay.
        #[serde(default)]
        overlay: Attrs,
        /// Replace values instead of adding deltas.
        #[serde(default)]
        replace: bool,
    },
    /// Overlay the per-terrain defense table.
    Defense {
        /// Terrain-keyed numeric overlay.
        #[serde(default)]
        overlay: Attrs,
        /// Replace values instead of adding deltas.
        #[serde(default)]
        replace: bool,
    },
    /// Overlay the per-damage-type resistance table.
    Resistance {
        /// Damage-type-keyed numeric overlay.
        #[serde(default)]
        overlay: Attrs,
        /// Replace values instead of adding deltas.
        #[serde(default)]
        replace: bool,
    },
    /// Set the zone-of-control flag.
    Zoc {
        /// New flag value.
        value: bool,
    },
    /// Append abilities the unit does not already have.
    NewAbility {
        /// Abilities document (children keyed by ability kind).
        #[serde(default)]
        abilities: Attrs,
    },
    /// Remove abilities by id.
    RemoveAbility {
        /// Abilities document naming the ids to remove.
        #[serde(default)]
        abilities: Attrs,
    },
    /// Adjust the unit's image-modification string.
    ImageMod {
        /// Replace the whole string.
        #[serde(default)]
        replace: Option<String>,
        /// Append to the string.
        #[serde(default)]
        add: Option<String>,
    },
    /// Attach an animation. Animation playback is owned by the rendering
    /// layer; the engine carries the body and applies nothing.
    NewAnimation {
        /// Raw animation body, preserved for round-trips.
        #[serde(default)]
        body: Attrs,
    },
    /// Switch the unit to a named variation of its type.
    Variation {
        /// Variation name.
        name: String,
    },
    /// Transform the unit into another type, keeping hp/xp/moves.
    Type {
        /// Target type id.
        name: String,
    },
    /// Override portrait and/or description.
    Profile {
        /// New portrait.
        #[serde(default)]
        portrait: Option<String>,
        /// New description.
        #[serde(default)]
        description: Option<String>,
    },
    /// An effect target this version does not know. Documented no-op.
    Unknown {
        /// The unrecognized `apply_to` value.
        apply_to: String,
        /// Raw body, preserved for round-trips.
        body: Attrs,
    },
}

impl EffectKind {
    /// The `apply_to` tag used in snapshots.
    #[must_use]
    pub fn apply_to(&self) -> &str {
        match self {
            EffectKind::Attack(_) => "attack",
            EffectKind::NewAttack { .. } => "new_attack",
            EffectKind::RemoveAttacks { .. } => "remove_attacks",
            EffectKind::Hitpoints { .. } => "hitpoints",
            EffectKind::Movement { .. } => "movement",
            EffectKind::MaxExperience { .. } => "max_experience",
            EffectKind::Loyal => "loyal",
            EffectKind::Status { .. } => "status",
            EffectKind::MovementCosts { .. } => "movement_costs",
            EffectKind::Defense { .. } => "defense",
            EffectKind::Resistance { .. } => "resistance",
            EffectKind::Zoc { .. } => "zoc",
            EffectKind::NewAbility { .. } => "new_ability",
            EffectKind::RemoveAbility { .. } => "remove_ability",
            EffectKind::ImageMod { .. } => "image_mod",
            EffectKind::NewAnimation { .. } => "new_animation",
            EffectKind::Variation { .. } => "variation",
            EffectKind::Type { .. } => "type",
            EffectKind::Profile { .. } => "profile",
            EffectKind::Unknown { apply_to, .. } => apply_to,
        }
    }
}

fn opt(body: &Attrs, key: &str) -> Option<String> {
    let text = body.get_text(key);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl Effect {
    /// Parse an effect from its snapshot body.
    ///
    /// Unrecognized `apply_to` values become [`EffectKind::Unknown`].
    #[must_use]
    pub fn from_attrs(body: &Attrs) -> Self {
        let apply_to = body.get_text("apply_to");
        let kind = match apply_to.as_str() {
            "attack" => EffectKind::Attack(AttackEffect {
                filter: attack_filter_from(body),
                set_name: opt(body, "set_name"),
                set_type: opt(body, "set_type"),
                increase_damage: opt(body, "increase_damage"),
                increase_attacks: opt(body, "increase_attacks"),
            }),
            "new_attack" => EffectKind::NewAttack {
                attack: Attack::from_attrs(body),
            },
            "remove_attacks" => EffectKind::RemoveAttacks {
                filter: attack_filter_from(body),
            },
            "hitpoints" => EffectKind::Hitpoints {
                increase: opt(body, "increase"),
                increase_total: opt(body, "increase_total"),
                set: opt(body, "set"),
                set_total: opt(body, "set_total"),
                heal_full: body.contains("heal_full") && body.get_bool("heal_full", true),
                violate_maximum: body.contains("violate_maximum")
                    && body.get_bool("violate_maximum", true),
            },
            "movement" => EffectKind::Movement {
                increase: opt(body, "increase"),
                set: opt(body, "set"),
            },
            "max_experience" => EffectKind::MaxExperience {
                increase: opt(body, "increase"),
            },
            "loyal" => EffectKind::Loyal,
            "status" => EffectKind::Status {
                add: opt(body, "add"),
                remove: opt(body, "remove"),
            },
            "movement_costs" => EffectKind::MovementCosts {
                overlay: body.child("movement_costs").cloned().unwrap_or_default(),
                replace: body.get_bool("replace", false),
            },
            "defense" => EffectKind::Defense {
                overlay: body.child("defense").cloned().unwrap_or_default(),
                replace: body.get_bool("replace", false),
            },
            "resistance" => EffectKind::Resistance {
                overlay: body.child("resistance").cloned().unwrap_or_default(),
                replace: body.get_bool("replace", false),
            },
            "zoc" => EffectKind::Zoc {
                value: body.get_bool("value", true),
            },
            "new_ability" => EffectKind::NewAbility {
                abilities: body.child("abilities").cloned().unwrap_or_default(),
            },
            "remove_ability" => EffectKind::RemoveAbility {
                abilities: body.child("abilities").cloned().unwrap_or_default(),
            },
            "image_mod" => EffectKind::ImageMod {
                replace: opt(body, "replace"),
                add: opt(body, "add"),
            },
            "new_animation" => EffectKind::NewAnimation { body: body.clone() },
            "variation" => EffectKind::Variation {
                name: body.get_text("name"),
            },
            "type" => EffectKind::Type {
                name: body.get_text("name"),
            },
            "profile" => EffectKind::Profile {
                portrait: opt(body, "portrait"),
                description: opt(body, "description"),
            },
            other => {
                debug!(apply_to = other, "Unrecognized effect target, carrying as no-op");
                EffectKind::Unknown {
                    apply_to: other.to_string(),
                    body: body.clone(),
                }
            }
        };
        Self {
            unit_type: opt(body, "unit_type"),
            unit_gender: opt(body, "unit_gender"),
            times: opt(body, "times"),
            kind,
        }
    }

    /// Serialize the effect back to its snapshot body.
    #[must_use]
    pub fn to_attrs(&self) -> Attrs {
        let mut body = match &self.kind {
            // These two carry their raw body verbatim.
            EffectKind::NewAnimation { body } | EffectKind::Unknown { body, .. } => body.clone(),
            _ => Attrs::new(),
        };
        body.set("apply_to", self.kind.apply_to());
        if let Some(v) = &self.unit_type {
            body.set("unit_type", v.as_str());
        }
        if let Some(v) = &self.unit_gender {
            body.set("unit_gender", v.as_str());
        }
        if let Some(v) = &self.times {
            body.set("times", v.as_str());
        }
        match &self.kind {
            EffectKind::Attack(e) => {
                attack_filter_to(&e.filter, &mut body);
                set_opt(&mut body, "set_name", &e.set_name);
                set_opt(&mut body, "set_type", &e.set_type);
                set_opt(&mut body, "increase_damage", &e.increase_damage);
                set_opt(&mut body, "increase_attacks", &e.increase_attacks);
            }
            EffectKind::NewAttack { attack } => {
                body.merge_with(&attack.to_attrs());
            }
            EffectKind::RemoveAttacks { filter } => attack_filter_to(filter, &mut body),
            EffectKind::Hitpoints {
                increase,
                increase_total,
                set,
                set_total,
                heal_full,
                violate_maximum,
            } => {
                set_opt(&mut body, "increase", increase);
                set_opt(&mut body, "increase_total", increase_total);
                set_opt(&mut body, "set", set);
                set_opt(&mut body, "set_total", set_total);
                if *heal_full {
                    body.set("heal_full", true);
                }
                if *violate_maximum {
                    body.set("violate_maximum", true);
                }
            }
            EffectKind::Movement { increase, set } => {
                set_opt(&mut body, "increase", increase);
                set_opt(&mut body, "set", set);
            }
            EffectKind::MaxExperience { increase } => set_opt(&mut body, "increase", increase),
            EffectKind::Loyal | EffectKind::NewAnimation { .. } | EffectKind::Unknown { .. } => {}
            EffectKind::Status { add, remove } => {
                set_opt(&mut body, "add", add);
                set_opt(&mut body, "remove", remove);
            }
            EffectKind::MovementCosts { overlay, replace }
            | EffectKind::Defense { overlay, replace }
            | EffectKind::Resistance { overlay, replace } => {
                if *replace {
                    body.set("replace", true);
                }
                body.add_child(self.kind.apply_to(), overlay.clone());
            }
            EffectKind::Zoc { value } => body.set("value", *value),
            EffectKind::NewAbility { abilities } | EffectKind::RemoveAbility { abilities } => {
                body.add_child("abilities", abilities.clone());
            }
            EffectKind::ImageMod { replace, add } => {
                set_opt(&mut body, "replace", replace);
                set_opt(&mut body, "add", add);
            }
            EffectKind::Variation { name } | EffectKind::Type { name } => {
                body.set("name", name.as_str());
            }
            EffectKind::Profile {
                portrait,
                description,
            } => {
                set_opt(&mut body, "portrait", portrait);
                set_opt(&mut body, "description", description);
            }
        }
        body
    }
}

fn attack_filter_from(body: &Attrs) -> AttackFilter {
    AttackFilter {
        name: opt(body, "name"),
        attack_type: opt(body, "type"),
        range: opt(body, "range"),
    }
}

fn attack_filter_to(filter: &AttackFilter, body: &mut Attrs) {
    set_opt(body, "name", &filter.name);
    set_opt(body, "type", &filter.attack_type);
    set_opt(body, "range", &filter.range);
}

fn set_opt(body: &mut Attrs, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        body.set(key, v.as_str());
    }
}

fn default_max_times() -> i64 {
    1
}

/// One modification record: a trait, an advancement, or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    /// Stable identifier within its kind.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Display name override for male units (traits).
    #[serde(default)]
    pub male_name: String,

    /// Display name override for female units (traits).
    #[serde(default)]
    pub female_name: String,

    /// Flavour description, prepended to the effect summary.
    #[serde(default)]
    pub description: String,

    /// Lifetime: absent or `"forever"` is permanent, anything else is
    /// dropped at the next level-up.
    #[serde(default)]
    pub duration: Option<String>,

    /// Trait-pool availability: `"musthave"` is always granted, `"any"` is
    /// open to every unit including leaders.
    #[serde(default)]
    pub availability: Option<String>,

    /// AMLA: how many times this advancement may be taken.
    #[serde(default = "default_max_times")]
    pub max_times: i64,

    /// AMLA: required prior advancement ids (repetition = required count).
    #[serde(default)]
    pub require_amla: Vec<String>,

    /// AMLA: only offered while the unit has no regular advancement left.
    #[serde(default)]
    pub strict_amla: bool,

    /// Ordered effect list.
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl Modification {
    /// A minimal record with just an id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            male_name: String::new(),
            female_name: String::new(),
            description: String::new(),
            duration: None,
            availability: None,
            max_times: 1,
            require_amla: Vec::new(),
            strict_amla: false,
            effects: Vec::new(),
        }
    }

    /// True when the record survives level-ups.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self.duration.as_deref(), None | Some("") | Some("forever"))
    }

    /// Parse a record from its snapshot section.
    #[must_use]
    pub fn from_attrs(body: &Attrs) -> Self {
        Self {
            id: body.get_text("id"),
            name: body.get_text("name"),
            male_name: body.get_text("male_name"),
            female_name: body.get_text("female_name"),
            description: body.get_text("description"),
            duration: opt(body, "duration"),
            availability: opt(body, "availability"),
            max_times: body.get_int("max_times", 1),
            require_amla: {
                let raw = body.get_text("require_amla");
                if raw.is_empty() {
                    Vec::new()
                } else {
                    raw.split(',').map(|s| s.trim().to_string()).collect()
                }
            },
            strict_amla: body.get_bool("strict_amla", false),
            effects: body.children("effect").map(Effect::from_attrs).collect(),
        }
    }

    /// Serialize the record back to its snapshot section.
    #[must_use]
    pub fn to_attrs(&self) -> Attrs {
        let mut body = Attrs::new();
        body.set("id", self.id.as_str());
        if !self.name.is_empty() {
            body.set("name", self.name.as_str());
        }
        if !self.male_name.is_empty() {
            body.set("male_name", self.male_name.as_str());
        }
        if !self.female_name.is_empty() {
            body.set("female_name", self.female_name.as_str());
        }
        if !self.description.is_empty() {
            body.set("description", self.description.as_str());
        }
        if let Some(d) = &self.duration {
            body.set("duration", d.as_str());
        }
        if let Some(a) = &self.availability {
            body.set("availability", a.as_str());
        }
        if self.max_times != 1 {
            body.set("max_times", self.max_times);
        }
        if !self.require_amla.is_empty() {
            body.set("require_amla", self.require_amla.join(","));
        }
        if self.strict_amla {
            body.set("strict_amla", true);
        }
        for effect in &self.effects {
            body.add_child("effect", effect.to_attrs());
        }
        body
    }
}

/// The unit's ordered record of trait/advancement/object grants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModificationLedger {
    #[serde(default)]
    advances: Vec<Modification>,
    #[serde(default)]
    traits: Vec<Modification>,
    #[serde(default)]
    objects: Vec<Modification>,
}

impl ModificationLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of one kind, in grant order.
    #[must_use]
    pub fn of_kind(&self, kind: ModKind) -> &[Modification] {
        match kind {
            ModKind::Advance => &self.advances,
            ModKind::Trait => &self.traits,
            ModKind::Object => &self.objects,
        }
    }

    fn of_kind_mut(&mut self, kind: ModKind) -> &mut Vec<Modification> {
        match kind {
            ModKind::Advance => &mut self.advances,
            ModKind::Trait => &mut self.traits,
            ModKind::Object => &mut self.objects,
        }
    }

    /// Append a record.
    pub fn add(&mut self, kind: ModKind, modification: Modification) {
        self.of_kind_mut(kind).push(modification);
    }

    /// Mutable access to trait records (gendered display-name fixups).
    pub fn traits_mut(&mut self) -> &mut [Modification] {
        &mut self.traits
    }

    /// Number of trait records.
    #[must_use]
    pub fn trait_count(&self) -> usize {
        self.traits.len()
    }

    /// True when a trait with this id is present.
    #[must_use]
    pub fn has_trait(&self, id: &str) -> bool {
        self.traits.iter().any(|t| t.id == id)
    }

    /// Ids of all traits with a non-empty id, in grant order.
    #[must_use]
    pub fn trait_ids(&self) -> Vec<String> {
        self.traits
            .iter()
            .filter(|t| !t.id.is_empty())
            .map(|t| t.id.clone())
            .collect()
    }

    /// How many records of a kind carry the given id.
    #[must_use]
    pub fn count(&self, kind: ModKind, id: &str) -> usize {
        self.of_kind(kind).iter().filter(|m| m.id == id).count()
    }

    /// Drop every record whose duration marks it transient.
    pub fn remove_temporary(&mut self) {
        for kind in ModKind::APPLY_ORDER {
            self.of_kind_mut(kind).retain(Modification::is_permanent);
        }
    }

    /// True when no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.advances.is_empty() && self.traits.is_empty() && self.objects.is_empty()
    }

    /// Parse the ledger from the snapshot `modifications` section.
    #[must_use]
    pub fn from_attrs(body: &Attrs) -> Self {
        let mut ledger = Self::new();
        for (name, child) in body.all_children() {
            match ModKind::parse(name) {
                Some(kind) => ledger.add(kind, Modification::from_attrs(child)),
                None => warn!(section = name, "Unknown modification kind, dropping"),
            }
        }
        ledger
    }

    /// Serialize the ledger to the snapshot `modifications` section.
    #[must_use]
    pub fn to_attrs(&self) -> Attrs {
        let mut body = Attrs::new();
        for kind in ModKind::APPLY_ORDER {
            for record in self.of_kind(kind) {
                body.add_child(kind.key(), record.to_attrs());
            }
        }
        body
    }
}

/// Round `n / 100` to the nearest integer, away from zero at `.5`.
fn div100_rounded(n: i64) -> i32 {
    let adjusted = if n >= 0 { n + 50 } else { n - 50 };
    (adjusted / 100) as i32
}

/// Apply a signed increment string to a value.
///
/// `"+N"` / `"-N"` add; a trailing `%` makes the increment a percentage of
/// the current value. `minimum` is enforced when positive. Malformed
/// strings leave the value unchanged.
#[must_use]
pub fn apply_increment(value: i32, amount: &str, minimum: i32) -> i32 {
    let Some(parsed) = parse_leading_int(amount) else {
        warn!(amount, "Malformed increment, ignoring");
        return value;
    };
    let delta = if amount.trim_end().ends_with('%') {
        div100_rounded(i64::from(value) * parsed)
    } else {
        parsed as i32
    };
    let result = value.saturating_add(delta);
    if minimum > 0 && result < minimum {
        minimum
    } else {
        result
    }
}

/// Apply an absolute-set string.
///
/// `"N"` assigns N; `"N%"` assigns N percent of `scale` (truncating).
/// Malformed strings yield `None`.
#[must_use]
pub fn apply_set(amount: &str, scale: i32) -> Option<i32> {
    let parsed = parse_leading_int(amount)?;
    if amount.trim_end().ends_with('%') {
        Some((i64::from(scale) * parsed / 100) as i32)
    } else {
        Some(parsed as i32)
    }
}

/// Resolve an effect's `times` field against a unit level.
#[must_use]
pub fn resolve_times(times: Option<&str>, level: i32) -> i32 {
    match times {
        None => 1,
        Some("per level") => level,
        Some(other) => match parse_leading_int(other) {
            Some(n) => n as i32,
            None => {
                warn!(times = other, "Malformed repeat count, defaulting to 1");
                1
            }
        },
    }
}

/// Merge a numeric overlay into a terrain/resistance table.
///
/// With `delta` true existing values are incremented, otherwise replaced.
pub(crate) fn merge_numeric_overlay(dst: &mut Attrs, overlay: &Attrs, delta: bool) {
    for (key, value) in overlay.values() {
        let add = match value {
            Value::Int(i) => *i,
            Value::Str(s) => parse_leading_int(s).unwrap_or(0),
            Value::Bool(_) => 0,
        };
        let base = if delta { dst.get_int(key, 0) } else { 0 };
        dst.set(key, base + add);
    }
}

// ============================================================================
// Merge engine
// ============================================================================

use crate::error::Result;
use crate::filter::list_contains;
use crate::rng::{draw, RandomSource};
use crate::unit::{Unit, MOD_SECTIONS};
use crate::unit_type::{Gender, TypeRegistry, UnitType};

impl Unit {
    /// Re-resolve the unit against a (possibly new) type template.
    ///
    /// Clears the old type's derived sections, merges the new type's
    /// document (beneath a movement-type parent when one is named),
    /// preserves a unit-specific profile override, resets every scalar
    /// derived field, regenerates traits where the ledger does not already
    /// satisfy musthave constraints, and re-applies the full ledger.
    ///
    /// If the resolved type changed identity the unit heals to full only
    /// *after* modifications are re-applied - a trait or object may alter
    /// the maximum first.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::error::GameError::UnknownUnitType`] from
    /// type-changing effects.
    pub fn advance_to(
        &mut self,
        ty: &UnitType,
        use_traits: bool,
        registry: &TypeRegistry,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        let ty = ty.variant(self.gender, &self.variation);
        self.reset_modifications(registry)?;

        // Strip the old type's visual tags and derived sections.
        self.attrs.set("halo", "");
        self.attrs.clear_children("animation");
        self.attrs.clear_children("abilities");
        self.attrs.clear_children("attack");

        if let Some(parent_name) = &ty.movement_type {
            if let Some(parent) = registry.movement_type(parent_name) {
                self.attrs.merge_with(parent);
            }
        }

        // A profile differing from the old type's is unit-specific; it
        // survives the advancement.
        let specific_profile = match registry.get(&self.type_id) {
            Some(old) if !self.type_id.is_empty() => {
                let old = old.variant(self.gender, &self.variation);
                let current = self.attrs.get_text("profile");
                if !current.is_empty() && current != old.attrs.get_text("profile") {
                    Some(current)
                } else {
                    None
                }
            }
            _ => None,
        };
        self.attrs.merge_with(&ty.attrs);
        if let Some(profile) = specific_profile {
            self.attrs.set("profile", profile);
        }

        self.advances_to = ty.advances_to.clone();
        self.race = ty.race.clone();
        self.type_name = ty.name.clone();
        if !ty.description.is_empty() {
            self.attrs.set("description", ty.description.as_str());
        }
        self.max_experience = ty.experience_needed();
        self.level = ty.level;
        self.alignment = ty.alignment;
        self.hitpoints = ty.hitpoints;
        self.max_hitpoints = ty.hitpoints;
        self.max_movement = ty.movement;
        self.zone_of_control = ty.has_zoc();
        self.attacks = ty.attacks.clone();
        self.cost = ty.cost;
        self.flying = ty.flying;
        self.max_attacks = ty.max_attacks;

        if self.attrs.get_bool("random_gender", false) {
            let gender = self.generate_gender(ty, true, rng.as_deref_mut());
            self.gender = gender;
            self.attrs.set("gender", gender.as_str());
        }

        let mut do_heal = false;
        if !ty.id.is_empty() && self.type_id != ty.id {
            // Can't heal until after mods are re-applied.
            do_heal = true;
            self.type_id = ty.id.clone();
        }

        if self.attrs.get_bool("random_traits", true) {
            self.generate_traits(!use_traits, registry, rng.as_deref_mut())?;
        } else {
            // Still grant musthaves the new type demands (advancing into an
            // undead line, say); random/optional traits are never re-rolled.
            self.generate_traits(true, registry, None)?;
        }

        // Needs type and gender fixed first: ledger effects can filter on
        // both, and may resolve differently after the advancement.
        self.apply_modifications(registry, rng)?;

        if do_heal {
            self.heal_all();
        }

        self.set_state("poisoned", "");
        self.set_state("slowed", "");
        self.set_state("stoned", "");
        self.user_end_turn = false;
        Ok(())
    }

    /// Restore the modification-governed state to the base type's
    /// unmodified values and clear both terrain caches.
    ///
    /// Must run before [`Unit::apply_modifications`] re-derives them, or
    /// stacked re-applications would double-apply deltas.
    ///
    /// # Errors
    ///
    /// Propagates an unknown-type failure for a non-empty type id. A unit
    /// with no type yet (mid-construction) is left untouched.
    pub fn reset_modifications(&mut self, registry: &TypeRegistry) -> Result<()> {
        if self.type_id.is_empty() {
            return Ok(());
        }
        let ty = registry.resolve(&self.type_id)?;
        let ty = ty.variant(self.gender, &self.variation);

        // Scalars first.
        self.traits_description.clear();
        self.is_fearless = false;
        self.is_healthy = false;
        self.max_hitpoints = ty.hitpoints;
        self.max_experience = ty.experience_needed();
        self.max_movement = ty.movement;
        self.attacks = ty.attacks.clone();

        // Modification-related caches.
        self.modification_descriptions.clear();
        self.movement_cost_cache.borrow_mut().clear();
        self.defense_cache.borrow_mut().clear();

        // Drop the modified sections, then restore the unmodified ones.
        for tag in MOD_SECTIONS {
            self.attrs.clear_children(tag);
        }
        if let Some(parent_name) = &ty.movement_type {
            if let Some(parent) = registry.movement_type(parent_name) {
                self.attrs.merge_with(parent);
            }
        }
        let mut to_merge = Attrs::new();
        for tag in MOD_SECTIONS {
            for child in ty.attrs.children(tag) {
                to_merge.add_child(tag, child.clone());
            }
        }
        self.attrs.merge_with(&to_merge);
        Ok(())
    }

    /// Re-apply the full ledger in kind order: advancements, then traits,
    /// then objects.
    ///
    /// Also rebuilds the trait description line (grant order, not sorted:
    /// quick,resilient and resilient,quick are different ledgers) and
    /// applies the registry's experience accelerator last.
    ///
    /// # Errors
    ///
    /// Propagates type-resolution failures from type-changing effects.
    pub fn apply_modifications(
        &mut self,
        registry: &TypeRegistry,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        let gender = self.gender;
        let mut fearless = self.is_fearless;
        let mut healthy = self.is_healthy;
        let mut trait_names = Vec::new();
        for record in self.modifications.traits_mut() {
            fearless = fearless || record.id == "fearless";
            healthy = healthy || record.id == "healthy";
            let gendered = match gender {
                Gender::Female => &record.female_name,
                Gender::Male => &record.male_name,
            };
            if !gendered.is_empty() {
                record.name = gendered.clone();
                trait_names.push(record.name.clone());
            } else if !record.name.is_empty() {
                trait_names.push(record.name.clone());
            }
        }
        self.is_fearless = fearless;
        self.is_healthy = healthy;

        for kind in ModKind::APPLY_ORDER {
            let records = self.modifications.of_kind(kind).to_vec();
            for record in &records {
                self.add_modification(kind, record, true, registry, rng.as_deref_mut())?;
            }
        }

        self.traits_description = trait_names.join(", ");

        // Experience acceleration applies last.
        let accel = i64::from(registry.experience_accelerator());
        self.max_experience =
            (((i64::from(self.max_experience) * accel + 50) / 100) as i32).max(1);
        Ok(())
    }

    /// Apply one modification record.
    ///
    /// With `no_add` the record is assumed to already sit in the ledger
    /// (re-application); otherwise it is appended first. Each effect
    /// checks its type/gender filters, resolves its repeat count, applies,
    /// and contributes to the record's effect description.
    ///
    /// # Errors
    ///
    /// Propagates type-resolution failures from `type`/`variation`
    /// effects.
    pub fn add_modification(
        &mut self,
        kind: ModKind,
        modification: &Modification,
        no_add: bool,
        registry: &TypeRegistry,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        if !no_add {
            self.modifications.add(kind, modification.clone());
        }

        let mut effects_description: Vec<String> = Vec::new();
        for effect in &modification.effects {
            if let Some(types) = &effect.unit_type {
                if !list_contains(types, &self.type_id) {
                    continue;
                }
            }
            if let Some(genders) = &effect.unit_gender {
                if !list_contains(genders, self.gender.as_str()) {
                    continue;
                }
            }

            let per_level = effect.times.as_deref() == Some("per level");
            let times = resolve_times(effect.times.as_deref(), self.level);
            let mut description = String::new();

            if times > 0 {
                for i in 0..times {
                    let last = i + 1 == times;
                    self.apply_effect_once(
                        &effect.kind,
                        no_add,
                        last,
                        &mut description,
                        registry,
                        rng.as_deref_mut(),
                    )?;
                }
            } else {
                // For "per level" at level 0 a subset of kinds still
                // rebuilds its tooltip text. Deliberately partial; do not
                // extend to other kinds.
                match &effect.kind {
                    EffectKind::Attack(e) => {
                        let mut names = Vec::new();
                        let mut desc = String::new();
                        for attack in &self.attacks {
                            if let Some(d) = attack.describe_effect(e) {
                                if !d.is_empty() {
                                    names.push(attack.display_name().to_string());
                                    desc = d;
                                }
                            }
                        }
                        if !names.is_empty() {
                            description = format!("{}: {}", names.join(" and "), desc);
                        }
                    }
                    EffectKind::Hitpoints {
                        increase_total: Some(amount),
                        ..
                    } => {
                        description = format!("{} HP", signed(amount));
                    }
                    EffectKind::Movement {
                        increase: Some(amount),
                        ..
                    } => {
                        description = format!("{} moves", signed(amount));
                    }
                    EffectKind::MaxExperience {
                        increase: Some(amount),
                    } => {
                        description = format!("{} XP to advance", signed(amount));
                    }
                    _ => {}
                }
            }

            if per_level && !description.is_empty() {
                description = format!("{description} per level");
            }
            if !description.is_empty() {
                effects_description.push(description);
            }
        }

        let mut record_desc = String::new();
        if !modification.description.is_empty() {
            record_desc.push_str(&modification.description);
            record_desc.push(' ');
        }
        record_desc.push_str(&effects_description.join(" and "));

        let entry = self.modification_descriptions.entry(kind).or_default();
        if !modification.name.is_empty() {
            entry.push_str(&format!("{}: {}", modification.name, record_desc));
        } else {
            entry.push_str(&record_desc);
        }
        entry.push('\n');
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_effect_once(
        &mut self,
        kind: &EffectKind,
        no_add: bool,
        last: bool,
        description: &mut String,
        registry: &TypeRegistry,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        match kind {
            EffectKind::Variation { name } => {
                // Only on first grant; re-applications already run against
                // the transformed unit.
                if !no_add {
                    self.variation = name.clone();
                    let ty = registry.resolve(&self.type_id)?;
                    self.advance_to(ty, false, registry, rng.as_deref_mut())?;
                }
            }
            EffectKind::Type { name } => {
                if !no_add {
                    let hitpoints = self.hitpoints;
                    let experience = self.experience;
                    let movement = self.movement;
                    self.type_id = name.clone();
                    let ty = registry.resolve(&self.type_id)?;
                    self.advance_to(ty, false, registry, rng.as_deref_mut())?;
                    self.hitpoints = hitpoints;
                    self.experience = experience;
                    self.movement = movement;
                }
            }
            EffectKind::Profile {
                portrait,
                description: profile_desc,
            } => {
                if let Some(portrait) = portrait {
                    self.attrs.set("profile", portrait.as_str());
                }
                if let Some(desc) = profile_desc {
                    self.attrs.set("description", desc.as_str());
                }
            }
            EffectKind::NewAttack { attack } => {
                self.attacks.push(attack.clone());
            }
            EffectKind::RemoveAttacks { filter } => {
                self.attacks.retain(|attack| !attack.matches(filter));
            }
            EffectKind::Attack(effect) => {
                let mut names = Vec::new();
                let mut desc = String::new();
                for attack in &mut self.attacks {
                    if let Some(d) = attack.apply_effect(effect) {
                        if !d.is_empty() && last {
                            names.push(attack.display_name().to_string());
                            desc = d;
                        }
                    }
                }
                if !names.is_empty() {
                    description.push_str(&format!("{}: {}", names.join(" and "), desc));
                }
            }
            EffectKind::Hitpoints {
                increase,
                increase_total,
                set,
                set_total,
                heal_full,
                violate_maximum,
            } => {
                debug!(
                    hp = self.hitpoints,
                    max = self.max_hitpoints,
                    "applying hitpoint mod"
                );
                if let Some(amount) = set {
                    if let Some(v) = apply_set(amount, self.max_hitpoints) {
                        self.hitpoints = v;
                    }
                }
                if let Some(amount) = set_total {
                    if let Some(v) = apply_set(amount, self.max_hitpoints) {
                        self.max_hitpoints = v;
                    }
                }
                if let Some(amount) = increase_total {
                    if last {
                        description.push_str(&format!("{} HP", signed(amount)));
                    }
                    self.max_hitpoints = apply_increment(self.max_hitpoints, amount, 0);
                }
                if self.max_hitpoints < 1 {
                    self.max_hitpoints = 1;
                }
                if *heal_full {
                    self.heal_all();
                }
                if let Some(amount) = increase {
                    self.hitpoints = apply_increment(self.hitpoints, amount, 0);
                }
                if self.hitpoints > self.max_hitpoints && !violate_maximum {
                    self.hitpoints = self.max_hitpoints;
                }
                if self.hitpoints < 1 {
                    self.hitpoints = 1;
                }
            }
            EffectKind::Movement { increase, set } => {
                if let Some(amount) = increase {
                    if last {
                        description.push_str(&format!("{} moves", signed(amount)));
                    }
                    self.max_movement = apply_increment(self.max_movement, amount, 1);
                }
                if let Some(amount) = set {
                    if let Some(v) = parse_leading_int(amount) {
                        self.max_movement = v as i32;
                    }
                }
                if self.movement > self.max_movement {
                    self.movement = self.max_movement;
                }
            }
            EffectKind::MaxExperience { increase } => {
                if let Some(amount) = increase {
                    if last {
                        description.push_str(&format!("{} XP to advance", signed(amount)));
                    }
                    self.max_experience = apply_increment(self.max_experience, amount, 1);
                }
            }
            EffectKind::Loyal => {
                self.attrs.set("upkeep", "loyal");
            }
            EffectKind::Status { add, remove } => {
                if let Some(state) = add {
                    self.set_state(state, "yes");
                }
                if let Some(state) = remove {
                    self.set_state(state, "");
                }
            }
            EffectKind::MovementCosts { overlay, replace } => {
                let table = self.attrs.child_or_insert("movement_costs");
                merge_numeric_overlay(table, overlay, !replace);
                self.movement_cost_cache.borrow_mut().clear();
            }
            EffectKind::Defense { overlay, replace } => {
                let table = self.attrs.child_or_insert("defense");
                merge_numeric_overlay(table, overlay, !replace);
                self.defense_cache.borrow_mut().clear();
            }
            EffectKind::Resistance { overlay, replace } => {
                let table = self.attrs.child_or_insert("resistance");
                merge_numeric_overlay(table, overlay, !replace);
            }
            EffectKind::Zoc { value } => {
                self.zone_of_control = *value;
            }
            EffectKind::NewAbility { abilities } => {
                let additions: Vec<(String, Attrs)> = abilities
                    .all_children()
                    .filter(|(_, body)| !self.has_ability_by_id(&body.get_text("id")))
                    .map(|(name, body)| (name.to_string(), body.clone()))
                    .collect();
                let section = self.attrs.child_or_insert("abilities");
                for (name, body) in additions {
                    section.add_child(&name, body);
                }
            }
            EffectKind::RemoveAbility { abilities } => {
                let ids: Vec<String> = abilities
                    .all_children()
                    .map(|(_, body)| body.get_text("id"))
                    .collect();
                for id in ids {
                    self.remove_ability_by_id(&id);
                }
            }
            EffectKind::ImageMod { replace, add } => {
                if let Some(mods) = replace {
                    self.image_mods = mods.clone();
                }
                if let Some(mods) = add {
                    self.image_mods.push_str(mods);
                }
            }
            EffectKind::NewAnimation { .. } => {
                // Animation playback is external; the body rides the ledger.
            }
            EffectKind::Unknown { apply_to, .. } => {
                debug!(apply_to = %apply_to, "Skipping unknown effect target");
            }
        }
        Ok(())
    }

    /// Grant mandatory traits and, unless `musthave_only`, fill up with
    /// random draws from the type's pool.
    ///
    /// Candidates already in the ledger are removed first, so the call is
    /// idempotent for musthaves and never re-rolls a locked-in trait -
    /// replays depend on that. Leaders draw only from `any`-availability
    /// candidates. Draws go through `rng` when supplied.
    ///
    /// # Errors
    ///
    /// Fails when the unit's type id no longer resolves.
    pub fn generate_traits(
        &mut self,
        musthave_only: bool,
        registry: &TypeRegistry,
        mut rng: Option<&mut (dyn RandomSource + '_)>,
    ) -> Result<()> {
        debug!(
            type_id = %self.type_id,
            musthave_only,
            "generating traits"
        );
        let ty = registry.resolve(&self.type_id)?;

        let mut candidates: Vec<Modification> = ty.possible_traits.clone();
        candidates.retain(|candidate| !self.modifications.has_trait(&candidate.id));
        let mut count = self.modifications.trait_count();
        let mut new_traits: Vec<Modification> = Vec::new();

        // Mandatory traits ignore the trait cap and draw no random
        // numbers, so they can never desync a replay.
        let mut i = 0;
        while i < candidates.len() {
            if candidates[i].availability.as_deref() == Some("musthave") {
                new_traits.push(candidates.remove(i));
                count += 1;
            } else {
                i += 1;
            }
        }

        if !musthave_only {
            if self.can_recruit {
                candidates.retain(|candidate| candidate.availability.as_deref() == Some("any"));
            }
            let target = ty.num_traits as usize;
            while count < target && !candidates.is_empty() {
                let index = draw(rng.as_deref_mut()) as usize % candidates.len();
                new_traits.push(candidates.remove(index));
                count += 1;
            }
            // Once rolled, never again - restoring a saved unit must not
            // re-roll.
            self.attrs.set("random_traits", "no");
        }

        for record in new_traits {
            self.modifications.add(ModKind::Trait, record);
        }
        Ok(())
    }
}

/// Prefix a delta string with `+` unless it already carries a sign.
fn signed(delta: &str) -> String {
    if delta.starts_with('-') || delta.starts_with('+') {
        delta.to_string()
    } else {
        format!("+{delta}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_flat_and_percent() {
        assert_eq!(apply_increment(30, "+4", 1), 34);
        assert_eq!(apply_increment(30, "-4", 1), 26);
        assert_eq!(apply_increment(30, "+20%", 1), 36);
        // -0.5 rounds away from zero.
        assert_eq!(apply_increment(10, "-5%", 1), 9);
    }

    #[test]
    fn test_increment_minimum_floor() {
        assert_eq!(apply_increment(3, "-10", 1), 1);
        // A non-positive minimum is not enforced.
        assert_eq!(apply_increment(3, "-10", 0), -7);
    }

    #[test]
    fn test_increment_malformed_is_noop() {
        assert_eq!(apply_increment(30, "lots", 1), 30);
    }

    #[test]
    fn test_set_absolute_and_percent() {
        assert_eq!(apply_set("25", 40), Some(25));
        assert_eq!(apply_set("50%", 40), Some(20));
        assert_eq!(apply_set("junk", 40), None);
    }

    #[test]
    fn test_resolve_times() {
        assert_eq!(resolve_times(None, 3), 1);
        assert_eq!(resolve_times(Some("per level"), 3), 3);
        assert_eq!(resolve_times(Some("2"), 3), 2);
        assert_eq!(resolve_times(Some("sideways"), 3), 1);
    }

    #[test]
    fn test_effect_round_trip_through_attrs() {
        let effect = Effect {
            unit_type: Some("spearman,swordsman".to_string()),
            unit_gender: None,
            times: Some("per level".to_string()),
            kind: EffectKind::Hitpoints {
                increase: None,
                increase_total: Some("+20%".to_string()),
                set: None,
                set_total: None,
                heal_full: false,
                violate_maximum: false,
            },
        };
        let body = effect.to_attrs();
        assert_eq!(body.get_text("apply_to"), "hitpoints");
        let back = Effect::from_attrs(&body);
        assert_eq!(back, effect);
    }

    #[test]
    fn test_unknown_effect_is_preserved() {
        let mut body = Attrs::new();
        body.set("apply_to", "halo_pulse");
        body.set("intensity", 3);
        let effect = Effect::from_attrs(&body);
        assert!(matches!(&effect.kind, EffectKind::Unknown { apply_to, .. } if apply_to == "halo_pulse"));
        let written = effect.to_attrs();
        assert_eq!(written.get_int("intensity", 0), 3);
    }

    #[test]
    fn test_ledger_remove_temporary() {
        let mut ledger = ModificationLedger::new();
        ledger.add(ModKind::Trait, Modification::with_id("strong"));
        let mut potion = Modification::with_id("potion");
        potion.duration = Some("turn".to_string());
        ledger.add(ModKind::Object, potion);
        let mut blessing = Modification::with_id("blessing");
        blessing.duration = Some("forever".to_string());
        ledger.add(ModKind::Object, blessing);

        ledger.remove_temporary();
        assert!(ledger.has_trait("strong"));
        assert_eq!(ledger.count(ModKind::Object, "potion"), 0);
        assert_eq!(ledger.count(ModKind::Object, "blessing"), 1);
    }

    #[test]
    fn test_ledger_round_trip() {
        let mut ledger = ModificationLedger::new();
        let mut quick = Modification::with_id("quick");
        quick.name = "quick".to_string();
        quick.effects.push(Effect::of(EffectKind::Movement {
            increase: Some("1".to_string()),
            set: None,
        }));
        ledger.add(ModKind::Trait, quick);
        ledger.add(ModKind::Advance, Modification::with_id("amla_tough"));

        let body = ledger.to_attrs();
        let back = ModificationLedger::from_attrs(&body);
        assert_eq!(back, ledger);
    }

    // ========================================================================
    // Merge engine
    // ========================================================================

    use crate::attack::Attack;
    use crate::rng::SeededRng;
    use crate::unit::Unit;
    use crate::unit_type::{TypeRegistry, UnitType};

    fn base_type(id: &str, hitpoints: i32) -> UnitType {
        UnitType {
            id: id.to_string(),
            name: id.to_string(),
            race: "human".to_string(),
            hitpoints,
            movement: 5,
            level: 1,
            attacks: vec![Attack {
                id: "sword".to_string(),
                name: "sword".to_string(),
                attack_type: "blade".to_string(),
                range: "melee".to_string(),
                damage: 8,
                number: 4,
            }],
            ..UnitType::default()
        }
    }

    fn trait_pool() -> Vec<Modification> {
        ["strong", "quick", "resilient", "intelligent"]
            .into_iter()
            .map(|id| {
                let mut m = Modification::with_id(id);
                m.name = id.to_string();
                m
            })
            .collect()
    }

    fn engine_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.insert_type(base_type("spearman", 30));
        registry.insert_type(base_type("swordsman", 42));

        let mut rolls = base_type("recruit", 28);
        rolls.num_traits = 2;
        rolls.possible_traits = trait_pool();
        registry.insert_type(rolls);

        let mut skeleton = base_type("skeleton", 26);
        let mut undead = Modification::with_id("undead");
        undead.name = "undead".to_string();
        undead.availability = Some("musthave".to_string());
        skeleton.num_traits = 1;
        skeleton.possible_traits = vec![undead];
        skeleton.possible_traits.extend(trait_pool());
        registry.insert_type(skeleton);
        registry
    }

    fn spawn(registry: &TypeRegistry, type_id: &str) -> Unit {
        let ty = registry.resolve(type_id).unwrap();
        Unit::from_type(registry, ty, 1, false, None, "", None).unwrap()
    }

    fn hp_boost(id: &str, amount: &str) -> Modification {
        let mut m = Modification::with_id(id);
        m.effects.push(Effect::of(EffectKind::Hitpoints {
            increase: None,
            increase_total: Some(amount.to_string()),
            set: None,
            set_total: None,
            heal_full: false,
            violate_maximum: false,
        }));
        m
    }

    #[test]
    fn test_hitpoint_percent_increase_raises_max_without_heal() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        unit.take_hit(5); // 25/30

        let boost = hp_boost("vigor", "+20%");
        unit.add_modification(ModKind::Trait, &boost, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), 36);
        assert_eq!(unit.hitpoints(), 25);
    }

    #[test]
    fn test_reapplication_does_not_stack() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let boost = hp_boost("vigor", "+20%");
        unit.add_modification(ModKind::Trait, &boost, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), 36);

        // reset + apply must land on the same value, not 36 * 1.2.
        unit.reset_modifications(&registry).unwrap();
        unit.apply_modifications(&registry, None).unwrap();
        assert_eq!(unit.max_hitpoints(), 36);
    }

    #[test]
    fn test_per_level_times_repeats_delta() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        assert_eq!(unit.level(), 1);

        let mut m = Modification::with_id("toughness");
        m.effects.push(Effect {
            unit_type: None,
            unit_gender: None,
            times: Some("per level".to_string()),
            kind: EffectKind::Hitpoints {
                increase: None,
                increase_total: Some("+2".to_string()),
                set: None,
                set_total: None,
                heal_full: false,
                violate_maximum: false,
            },
        });
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), 32);

        unit.level = 3;
        unit.reset_modifications(&registry).unwrap();
        unit.apply_modifications(&registry, None).unwrap();
        assert_eq!(unit.max_hitpoints(), 36);
    }

    #[test]
    fn test_type_filter_skips_non_matching_effect() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let mut m = hp_boost("banner", "+10");
        m.effects[0].unit_type = Some("swordsman,mage".to_string());
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), 30);

        // A matching CSV applies it.
        let mut m2 = hp_boost("banner2", "+10");
        m2.effects[0].unit_type = Some("swordsman,spearman".to_string());
        unit.add_modification(ModKind::Object, &m2, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), 40);
    }

    #[test]
    fn test_unknown_effect_is_a_noop() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let before_hp = unit.max_hitpoints();
        let mut m = Modification::with_id("future");
        m.effects.push(Effect::of(EffectKind::Unknown {
            apply_to: "overlay_particles".to_string(),
            body: Attrs::new(),
        }));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert_eq!(unit.max_hitpoints(), before_hp);
        assert_eq!(unit.modifications().count(ModKind::Object, "future"), 1);
    }

    #[test]
    fn test_movement_costs_overlay_updates_cached_lookup() {
        use crate::terrain::{TerrainId, TerrainTable};

        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let table = TerrainTable::new();
        let forest = TerrainId::new("forest");

        let mut costs = Attrs::new();
        costs.set("forest", 3);
        unit.attrs.add_child("movement_costs", costs);
        assert_eq!(unit.movement_cost(&forest, &table), 3);

        let mut overlay = Attrs::new();
        overlay.set("forest", 1);
        let mut m = Modification::with_id("forest_boots");
        m.effects.push(Effect::of(EffectKind::MovementCosts {
            overlay,
            replace: true,
        }));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        // The stale cached 3 must be gone.
        assert_eq!(unit.movement_cost(&forest, &table), 1);
    }

    #[test]
    fn test_status_and_loyal_effects() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let mut m = Modification::with_id("dark_gift");
        m.effects.push(Effect::of(EffectKind::Status {
            add: Some("cursed".to_string()),
            remove: None,
        }));
        m.effects.push(Effect::of(EffectKind::Loyal));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert!(unit.state_bool("cursed"));
        assert_eq!(unit.upkeep(), 0);
    }

    #[test]
    fn test_new_ability_skips_duplicates_and_remove_ability() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");

        let mut grant = Attrs::new();
        let mut ambush = Attrs::new();
        ambush.set("id", "ambush");
        grant.add_child("hides", ambush);
        let mut m = Modification::with_id("cloak");
        m.effects.push(Effect::of(EffectKind::NewAbility {
            abilities: grant.clone(),
        }));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert!(unit.has_ability_by_id("ambush"));
        assert!(unit.has_ability_kind("hides"));

        // Granting again must not duplicate.
        let mut m2 = Modification::with_id("cloak2");
        m2.effects.push(Effect::of(EffectKind::NewAbility { abilities: grant }));
        unit.add_modification(ModKind::Object, &m2, false, &registry, None)
            .unwrap();
        let section = unit.attrs().child("abilities").unwrap();
        assert_eq!(section.children("hides").count(), 1);

        let mut removal = Attrs::new();
        let mut target = Attrs::new();
        target.set("id", "ambush");
        removal.add_child("hides", target);
        let mut m3 = Modification::with_id("dispel");
        m3.effects.push(Effect::of(EffectKind::RemoveAbility { abilities: removal }));
        unit.add_modification(ModKind::Object, &m3, false, &registry, None)
            .unwrap();
        assert!(!unit.has_ability_by_id("ambush"));
    }

    #[test]
    fn test_remove_attacks_and_new_attack() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let mut m = Modification::with_id("rearm");
        m.effects.push(Effect::of(EffectKind::RemoveAttacks {
            filter: AttackFilter {
                range: Some("melee".to_string()),
                ..AttackFilter::default()
            },
        }));
        m.effects.push(Effect::of(EffectKind::NewAttack {
            attack: Attack {
                id: "crossbow".to_string(),
                name: "crossbow".to_string(),
                attack_type: "pierce".to_string(),
                range: "ranged".to_string(),
                damage: 12,
                number: 2,
            },
        }));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert_eq!(unit.attacks().len(), 1);
        assert_eq!(unit.attacks()[0].id, "crossbow");
    }

    #[test]
    fn test_musthave_generation_is_idempotent() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "skeleton");
        assert!(unit.modifications().has_trait("undead"));
        let before = unit.modifications().trait_count();

        unit.generate_traits(true, &registry, None).unwrap();
        unit.generate_traits(true, &registry, None).unwrap();
        assert_eq!(unit.modifications().trait_count(), before);
        assert_eq!(
            unit.modifications()
                .trait_ids()
                .iter()
                .filter(|id| *id == "undead")
                .count(),
            1
        );
    }

    #[test]
    fn test_trait_rolls_are_deterministic_under_a_seeded_stream() {
        let registry = engine_registry();
        let ty = registry.resolve("recruit").unwrap();

        let mut rng_a = SeededRng::new(99);
        let a = Unit::from_type(&registry, ty, 1, true, None, "", Some(&mut rng_a)).unwrap();
        let mut rng_b = SeededRng::new(99);
        let b = Unit::from_type(&registry, ty, 1, true, None, "", Some(&mut rng_b)).unwrap();

        assert_eq!(a.traits_list(), b.traits_list());
        assert_eq!(a.traits_list().len(), 2);
        assert_eq!(a.gender(), b.gender());
    }

    #[test]
    fn test_leaders_draw_only_any_availability_traits() {
        let mut registry = engine_registry();
        let mut leader_type = base_type("lord", 50);
        leader_type.num_traits = 2;
        let mut open = Modification::with_id("loyal_guard");
        open.availability = Some("any".to_string());
        leader_type.possible_traits = trait_pool();
        leader_type.possible_traits.push(open);
        registry.insert_type(leader_type);

        let ty = registry.resolve("lord").unwrap();
        let mut unit = Unit::from_type(&registry, ty, 1, false, None, "", None).unwrap();
        unit.set_can_recruit(true);
        let mut rng = SeededRng::new(3);
        unit.generate_traits(false, &registry, Some(&mut rng)).unwrap();
        assert_eq!(unit.traits_list(), vec!["loyal_guard".to_string()]);
    }

    #[test]
    fn test_advance_heals_only_after_mods_are_reapplied() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        unit.add_modification(ModKind::Trait, &hp_boost("vigor", "+20%"), false, &registry, None)
            .unwrap();
        unit.take_hit(20);

        let target = registry.resolve("swordsman").unwrap();
        unit.advance_to(target, false, &registry, None).unwrap();
        // 42 base, +20% = 50 (rounded), healed to the *modified* max.
        assert_eq!(unit.max_hitpoints(), 50);
        assert_eq!(unit.hitpoints(), 50);
        assert_eq!(unit.type_id(), "swordsman");
    }

    #[test]
    fn test_type_effect_transforms_but_keeps_pools() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        unit.take_hit(10);
        let hp = unit.hitpoints();
        let moves = unit.movement_left();

        let mut m = Modification::with_id("polymorph");
        m.effects.push(Effect::of(EffectKind::Type {
            name: "swordsman".to_string(),
        }));
        unit.add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap();
        assert_eq!(unit.type_id(), "swordsman");
        assert_eq!(unit.hitpoints(), hp);
        assert_eq!(unit.movement_left(), moves);
    }

    #[test]
    fn test_transform_to_unknown_type_is_fatal() {
        let registry = engine_registry();
        let mut unit = spawn(&registry, "spearman");
        let mut m = Modification::with_id("curse");
        m.effects.push(Effect::of(EffectKind::Type {
            name: "chimera".to_string(),
        }));
        let err = unit
            .add_modification(ModKind::Object, &m, false, &registry, None)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::GameError::UnknownUnitType { type_id } if type_id == "chimera"
        ));
    }

    #[test]
    fn test_experience_accelerator_applies_last() {
        let mut registry = engine_registry();
        registry.set_experience_accelerator(50);
        let unit = spawn(&registry, "spearman");
        assert_eq!(unit.max_experience(), 250);
    }
}
