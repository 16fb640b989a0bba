//! The owning unit container.
//!
//! A [`UnitRoster`] maps board locations to units and owns the
//! [`VisibilityCacheRegistry`] its units register in. Every removal path
//! deregisters the unit *before* letting go of it, so a global cache
//! sweep never chases a unit that no longer exists.

use std::collections::BTreeMap;

use crate::board::Location;
use crate::unit::Unit;
use crate::visibility::VisibilityCacheRegistry;

/// Location-keyed collection of live units.
#[derive(Debug, Default)]
pub struct UnitRoster {
    units: BTreeMap<Location, Unit>,
    visibility_registry: VisibilityCacheRegistry,
}

impl UnitRoster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units on the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when no units are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit at a location.
    #[must_use]
    pub fn get(&self, loc: Location) -> Option<&Unit> {
        self.units.get(&loc)
    }

    /// Mutable unit at a location.
    pub fn get_mut(&mut self, loc: Location) -> Option<&mut Unit> {
        self.units.get_mut(&loc)
    }

    /// Find a unit (and its location) by string id.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<(Location, &Unit)> {
        self.units
            .iter()
            .find(|(_, unit)| unit.id() == id)
            .map(|(loc, unit)| (*loc, unit))
    }

    /// Iterate over all units in location order.
    pub fn iter(&self) -> impl Iterator<Item = (Location, &Unit)> {
        self.units.iter().map(|(loc, unit)| (*loc, unit))
    }

    /// Iterate mutably over all units in location order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Location, &mut Unit)> {
        self.units.iter_mut().map(|(loc, unit)| (*loc, unit))
    }

    /// Place a unit, returning whatever stood there before.
    ///
    /// A displaced unit leaves the roster alive; its registry entry is
    /// dropped here so sweeps stop tracking it.
    pub fn insert(&mut self, loc: Location, unit: Unit) -> Option<Unit> {
        let displaced = self.units.insert(loc, unit);
        if let Some(old) = &displaced {
            self.visibility_registry.deregister(old.underlying_id());
        }
        displaced
    }

    /// Remove and return the unit at a location.
    ///
    /// Deregisters from the visibility registry first - destruction must
    /// never leave a stale back-reference behind.
    pub fn remove(&mut self, loc: Location) -> Option<Unit> {
        let unit = self.units.remove(&loc)?;
        self.visibility_registry.deregister(unit.underlying_id());
        Some(unit)
    }

    /// The registry units with active visibility caches register in.
    #[must_use]
    pub fn visibility_registry(&self) -> &VisibilityCacheRegistry {
        &self.visibility_registry
    }

    /// Clear the visibility caches of every registered unit.
    ///
    /// Only units that actually cached something get touched.
    pub fn clear_status_caches(&self) {
        for id in self.visibility_registry.drain() {
            if let Some(unit) = self.units.values().find(|u| u.underlying_id() == id) {
                unit.clear_visibility_cache();
            }
        }
    }

    /// Number of units owned by a side.
    #[must_use]
    pub fn side_units(&self, side: u32) -> usize {
        self.units.values().filter(|u| u.side() == side).count()
    }

    /// Total upkeep owed by a side.
    #[must_use]
    pub fn side_upkeep(&self, side: u32) -> i32 {
        self.units
            .values()
            .filter(|u| u.side() == side)
            .map(Unit::upkeep)
            .sum()
    }

    /// A side's leader, if one is on the board.
    #[must_use]
    pub fn side_leader(&self, side: u32) -> Option<(Location, &Unit)> {
        self.iter()
            .find(|(_, unit)| unit.can_recruit() && unit.side() == side)
    }
}

/// RAII guard that places a unit for the duration of a scope.
///
/// The placed copy gets a clone id (transient placements must never
/// collide with persistent ids); whatever stood at the location is
/// restored when the guard drops.
#[derive(Debug)]
pub struct TemporaryPlacement<'a> {
    roster: &'a mut UnitRoster,
    loc: Location,
    displaced: Option<Unit>,
}

impl<'a> TemporaryPlacement<'a> {
    /// Displace the occupant of `loc` (if any) with `unit`.
    pub fn new(roster: &'a mut UnitRoster, loc: Location, mut unit: Unit) -> Self {
        unit.assign_clone_id();
        let displaced = roster.insert(loc, unit);
        Self {
            roster,
            loc,
            displaced,
        }
    }

    /// The temporarily placed unit.
    #[must_use]
    pub fn unit(&self) -> &Unit {
        // Inserted in `new` and nothing else holds `&mut` to the roster.
        self.roster.get(self.loc).expect("temporary unit present")
    }

    /// Location of the placement.
    #[must_use]
    pub fn location(&self) -> Location {
        self.loc
    }
}

impl Drop for TemporaryPlacement<'_> {
    fn drop(&mut self) {
        self.roster.remove(self.loc);
        if let Some(displaced) = self.displaced.take() {
            self.roster.insert(self.loc, displaced);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::Attack;
    use crate::unit_type::{TypeRegistry, UnitType};

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.insert_type(UnitType {
            id: "militia".to_string(),
            name: "Militia".to_string(),
            race: "human".to_string(),
            hitpoints: 24,
            movement: 5,
            level: 1,
            attacks: vec![Attack {
                id: "club".to_string(),
                name: "club".to_string(),
                attack_type: "impact".to_string(),
                range: "melee".to_string(),
                damage: 5,
                number: 2,
            }],
            ..UnitType::default()
        });
        registry
    }

    fn spawn(registry: &TypeRegistry, side: u32) -> Unit {
        let ty = registry.resolve("militia").unwrap();
        Unit::from_type(registry, ty, side, false, None, "", None).unwrap()
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = registry();
        let mut roster = UnitRoster::new();
        let loc = Location::new(2, 3);
        roster.insert(loc, spawn(&registry, 1));
        assert_eq!(roster.len(), 1);
        assert!(roster.get(loc).is_some());
        let removed = roster.remove(loc).unwrap();
        assert_eq!(removed.type_id(), "militia");
        assert!(roster.is_empty());
    }

    #[test]
    fn test_remove_deregisters_cached_unit() {
        let registry = registry();
        let mut roster = UnitRoster::new();
        let loc = Location::new(0, 0);
        roster.insert(loc, spawn(&registry, 1));
        let id = roster.get(loc).unwrap().underlying_id();
        roster.visibility_registry().register(id);

        let _ = roster.remove(loc);
        assert!(!roster.visibility_registry().contains(id));
    }

    #[test]
    fn test_clear_status_caches_sweeps_registered_units() {
        let registry = registry();
        let mut roster = UnitRoster::new();
        let loc = Location::new(1, 1);
        roster.insert(loc, spawn(&registry, 1));
        let unit = roster.get(loc).unwrap();
        unit.invisibility_cache
            .borrow_mut()
            .insert(Location::new(1, 1), true);
        roster.visibility_registry().register(unit.underlying_id());

        roster.clear_status_caches();
        assert!(roster.visibility_registry().is_empty());
        assert!(roster.get(loc).unwrap().invisibility_cache.borrow().is_empty());
    }

    #[test]
    fn test_side_aggregates() {
        let registry = registry();
        let mut roster = UnitRoster::new();
        roster.insert(Location::new(0, 0), spawn(&registry, 1));
        roster.insert(Location::new(1, 0), spawn(&registry, 1));
        roster.insert(Location::new(2, 0), spawn(&registry, 2));
        let mut leader = spawn(&registry, 2);
        leader.set_can_recruit(true);
        roster.insert(Location::new(3, 0), leader);

        assert_eq!(roster.side_units(1), 2);
        assert_eq!(roster.side_units(2), 2);
        // Two level-1 units on full upkeep; the leader is free.
        assert_eq!(roster.side_upkeep(1), 2);
        assert_eq!(roster.side_upkeep(2), 1);
        let (loc, found) = roster.side_leader(2).unwrap();
        assert_eq!(loc, Location::new(3, 0));
        assert!(found.can_recruit());
    }

    #[test]
    fn test_temporary_placement_restores_occupant() {
        let registry = registry();
        let mut roster = UnitRoster::new();
        let loc = Location::new(4, 4);
        let original = spawn(&registry, 1);
        let original_id = original.underlying_id();
        roster.insert(loc, original);

        let visitor = spawn(&registry, 2);
        let visitor_persistent_id = visitor.underlying_id();
        {
            let placement = TemporaryPlacement::new(&mut roster, loc, visitor);
            assert_eq!(placement.unit().side(), 2);
            // The placed copy runs on a clone id.
            assert_ne!(placement.unit().underlying_id(), visitor_persistent_id);
        }
        let restored = roster.get(loc).unwrap();
        assert_eq!(restored.underlying_id(), original_id);
        assert_eq!(restored.side(), 1);
    }
}
