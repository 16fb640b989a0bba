//! The visibility/concealment engine.
//!
//! A unit is concealed at a location when it currently holds the `hidden`
//! status *and* has a `hides`-kind ability. Adjacent enemies defeat
//! concealment; checking whether such an enemy can actually be seen uses
//! a `see_all=true` sub-query, which is what breaks the mutual-ambush
//! recursion between two adjacent stealthed units.
//!
//! `see_all=true` results are memoized per location in the unit's own
//! cache. On the first cache write the unit registers itself in the
//! container-owned [`VisibilityCacheRegistry`], so a later sweep touches
//! only units that actually hold cached state.

use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::board::{adjacent_tiles, BoardContext, Location};
use crate::roster::UnitRoster;
use crate::unit::Unit;

/// Registry of units holding an active visibility cache.
///
/// Owned by the unit container. Holds underlying ids only - a relation
/// for lookup, never ownership - so destruction can never leave a
/// dangling entry that a sweep would chase into freed state: removal
/// paths deregister before the unit is dropped.
#[derive(Debug, Default)]
pub struct VisibilityCacheRegistry {
    active: RefCell<BTreeSet<u64>>,
}

impl VisibilityCacheRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a unit started caching.
    pub fn register(&self, underlying_id: u64) {
        self.active.borrow_mut().insert(underlying_id);
    }

    /// Drop a unit's entry.
    pub fn deregister(&self, underlying_id: u64) {
        self.active.borrow_mut().remove(&underlying_id);
    }

    /// True when the unit is currently registered.
    #[must_use]
    pub fn contains(&self, underlying_id: u64) -> bool {
        self.active.borrow().contains(&underlying_id)
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.borrow().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.borrow().is_empty()
    }

    /// Take every registered id, leaving the registry empty.
    #[must_use]
    pub fn drain(&self) -> Vec<u64> {
        std::mem::take(&mut *self.active.borrow_mut())
            .into_iter()
            .collect()
    }
}

impl Unit {
    /// Whether the unit is concealed at `loc`.
    ///
    /// `see_all=true` asks "is it hidden at all" (the memoized default);
    /// `see_all=false` asks from an observer's point of view, where an
    /// adjacent enemy only reveals the unit if the enemy's tile is not
    /// fogged to the hiding side and the enemy is not itself concealed
    /// (checked with `see_all=true` to terminate mutual-ambush recursion).
    #[must_use]
    pub fn invisible(&self, loc: Location, board: &dyn BoardContext, see_all: bool) -> bool {
        if see_all {
            if let Some(&cached) = self.invisibility_cache.borrow().get(&loc) {
                return cached;
            }
        }

        let mut is_inv = self.state_bool("hidden") && self.has_ability_kind("hides");
        if is_inv {
            for adj in adjacent_tiles(loc) {
                let Some(other) = board.unit_at(adj) else {
                    continue;
                };
                if !board.is_enemy(self.side(), other.side()) {
                    continue;
                }
                // Enemy spotted next door; can it actually be seen?
                if see_all {
                    is_inv = false;
                    break;
                }
                if !board.fogged(self.side(), adj) && !other.invisible(adj, board, true) {
                    is_inv = false;
                    break;
                }
            }
        }

        if see_all {
            let mut cache = self.invisibility_cache.borrow_mut();
            if cache.is_empty() {
                board.visibility_registry().register(self.underlying_id());
            }
            cache.insert(loc, is_inv);
        }
        is_inv
    }

    /// Forget all cached concealment results.
    pub fn clear_visibility_cache(&self) {
        self.invisibility_cache.borrow_mut().clear();
    }

    /// The unit just ambushed (or was otherwise revealed): drop its cached
    /// concealment results and deregister it.
    pub fn ambush(&self, registry: &VisibilityCacheRegistry) {
        self.clear_visibility_cache();
        registry.deregister(self.underlying_id());
    }
}

/// Look up the unit at `loc` as seen by `viewer_side`.
///
/// Fogged tiles and concealed enemies yield `None` unless `see_all`.
#[must_use]
pub fn find_visible_unit<'a>(
    units: &'a UnitRoster,
    loc: Location,
    board: &dyn BoardContext,
    viewer_side: u32,
    see_all: bool,
) -> Option<&'a Unit> {
    let unit = units.get(loc)?;
    if board.on_board(loc) && !see_all {
        if board.fogged(viewer_side, loc) {
            return None;
        }
        if board.is_enemy(viewer_side, unit.side()) && unit.invisible(loc, board, true) {
            return None;
        }
    }
    Some(unit)
}
