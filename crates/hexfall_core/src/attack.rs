//! Attack definitions and attack-targeted modification effects.

use serde::{Deserialize, Serialize};

use crate::attr::Attrs;
use crate::filter::list_contains;
use crate::modification::apply_increment;

/// One attack of a unit or unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    /// Stable identifier (also the default display name).
    pub id: String,

    /// Display name; falls back to the id when empty.
    #[serde(default)]
    pub name: String,

    /// Damage type (e.g. `blade`, `pierce`, `fire`).
    #[serde(default)]
    pub attack_type: String,

    /// Range class (e.g. `melee`, `ranged`).
    #[serde(default = "default_range")]
    pub range: String,

    /// Damage per strike.
    #[serde(default)]
    pub damage: i32,

    /// Number of strikes.
    #[serde(default = "default_number")]
    pub number: i32,
}

fn default_range() -> String {
    "melee".to_string()
}

fn default_number() -> i32 {
    1
}

/// Filter over attacks, used by `remove_attacks` effects and by the
/// attack-mutating effect itself. Empty fields match everything; populated
/// fields are CSV membership tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackFilter {
    /// Attack id list.
    #[serde(default)]
    pub name: Option<String>,
    /// Damage type list.
    #[serde(default)]
    pub attack_type: Option<String>,
    /// Range class list.
    #[serde(default)]
    pub range: Option<String>,
}

/// Mutations an `attack` effect applies to every matching attack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEffect {
    /// Which attacks to touch.
    #[serde(default)]
    pub filter: AttackFilter,
    /// Rename matching attacks.
    #[serde(default)]
    pub set_name: Option<String>,
    /// Change the damage type of matching attacks.
    #[serde(default)]
    pub set_type: Option<String>,
    /// Damage delta (`"+1"`, `"-2"`, `"+25%"`).
    #[serde(default)]
    pub increase_damage: Option<String>,
    /// Strike-count delta.
    #[serde(default)]
    pub increase_attacks: Option<String>,
}

impl Attack {
    /// Parse an attack from its snapshot section.
    #[must_use]
    pub fn from_attrs(body: &Attrs) -> Self {
        Self {
            id: body.get_text("name"),
            name: body.get_text("description"),
            attack_type: body.get_text("type"),
            range: {
                let r = body.get_text("range");
                if r.is_empty() {
                    default_range()
                } else {
                    r
                }
            },
            damage: body.get_int("damage", 0) as i32,
            number: body.get_int("number", 1) as i32,
        }
    }

    /// Serialize the attack to its snapshot section.
    #[must_use]
    pub fn to_attrs(&self) -> Attrs {
        let mut body = Attrs::new();
        body.set("name", self.id.as_str());
        if !self.name.is_empty() {
            body.set("description", self.name.as_str());
        }
        body.set("type", self.attack_type.as_str());
        body.set("range", self.range.as_str());
        body.set("damage", self.damage);
        body.set("number", self.number);
        body
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// True when the attack passes the filter.
    #[must_use]
    pub fn matches(&self, filter: &AttackFilter) -> bool {
        if let Some(names) = &filter.name {
            if !list_contains(names, &self.id) {
                return false;
            }
        }
        if let Some(types) = &filter.attack_type {
            if !list_contains(types, &self.attack_type) {
                return false;
            }
        }
        if let Some(ranges) = &filter.range {
            if !list_contains(ranges, &self.range) {
                return false;
            }
        }
        true
    }

    /// Apply an attack effect.
    ///
    /// Returns `None` when the effect's filter does not select this attack,
    /// otherwise the human-readable description of what changed (possibly
    /// empty for pure renames).
    pub fn apply_effect(&mut self, effect: &AttackEffect) -> Option<String> {
        if !self.matches(&effect.filter) {
            return None;
        }
        if let Some(name) = &effect.set_name {
            self.id = name.clone();
            self.name = name.clone();
        }
        if let Some(ty) = &effect.set_type {
            self.attack_type = ty.clone();
        }
        if let Some(delta) = &effect.increase_damage {
            self.damage = apply_increment(self.damage, delta, 1);
        }
        if let Some(delta) = &effect.increase_attacks {
            self.number = apply_increment(self.number, delta, 1);
        }
        Some(Self::describe(effect))
    }

    /// Description of an attack effect without applying it (used for the
    /// level-0 "per level" tooltip rebuild).
    #[must_use]
    pub fn describe_effect(&self, effect: &AttackEffect) -> Option<String> {
        if !self.matches(&effect.filter) {
            return None;
        }
        Some(Self::describe(effect))
    }

    fn describe(effect: &AttackEffect) -> String {
        let mut parts = Vec::new();
        if let Some(delta) = &effect.increase_damage {
            parts.push(format!("{} damage", signed(delta)));
        }
        if let Some(delta) = &effect.increase_attacks {
            parts.push(format!("{} strikes", signed(delta)));
        }
        parts.join(", ")
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

    fn sword() -> Attack {
        Attack {
            id: "sword".to_string(),
            name: "sword".to_string(),
            attack_type: "blade".to_string(),
            range: "melee".to_string(),
            damage: 8,
            number: 4,
        }
    }

    #[test]
    fn test_filter_csv_membership() {
        let attack = sword();
        let by_range = AttackFilter {
            range: Some("ranged,melee".to_string()),
            ..AttackFilter::default()
        };
        assert!(attack.matches(&by_range));
        let wrong_type = AttackFilter {
            attack_type: Some("fire".to_string()),
            ..AttackFilter::default()
        };
        assert!(!attack.matches(&wrong_type));
    }

    #[test]
    fn test_apply_damage_increase() {
        let mut attack = sword();
        let effect = AttackEffect {
            increase_damage: Some("+2".to_string()),
            ..AttackEffect::default()
        };
        let desc = attack.apply_effect(&effect);
        assert_eq!(attack.damage, 10);
        assert_eq!(desc.as_deref(), Some("+2 damage"));
    }

    #[test]
    fn test_apply_percent_increase_rounds() {
        let mut attack = sword();
        let effect = AttackEffect {
            increase_damage: Some("+25%".to_string()),
            ..AttackEffect::default()
        };
        attack.apply_effect(&effect);
        assert_eq!(attack.damage, 10);
    }

    #[test]
    fn test_unmatched_filter_is_untouched() {
        let mut attack = sword();
        let effect = AttackEffect {
            filter: AttackFilter {
                name: Some("bow".to_string()),
                ..AttackFilter::default()
            },
            increase_damage: Some("+2".to_string()),
            ..AttackEffect::default()
        };
        assert!(attack.apply_effect(&effect).is_none());
        assert_eq!(attack.damage, 8);
    }

    #[test]
    fn test_damage_floor_is_one() {
        let mut attack = sword();
        let effect = AttackEffect {
            increase_damage: Some("-20".to_string()),
            ..AttackEffect::default()
        };
        attack.apply_effect(&effect);
        assert_eq!(attack.damage, 1);
    }
}
