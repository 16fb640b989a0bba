//! # Hexfall Core
//!
//! Deterministic unit-state and rules engine for Hexfall.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO beyond data-file parsing helpers
//! - No system randomness outside the documented fallback source
//!
//! A unit's effective stats (hitpoints, movement, resistances, attacks,
//! abilities) are derived by layering data sources: the base type
//! template, acquired traits, equipment-like objects and transient
//! battlefield status. The layering lives in the merge engine; on top of
//! it sit memoized terrain lookups, a structured unit-filter language and
//! the concealment engine.
//!
//! ## Crate Structure
//!
//! - [`attr`] - hierarchical attribute documents (unknown-field round-trip)
//! - [`unit_type`] - immutable type templates and the type registry
//! - [`unit`] - the mutable unit, snapshots, terrain-cost caches
//! - [`modification`] - the modification ledger and merge engine
//! - [`filter`] - the unit query/filter engine
//! - [`visibility`] - concealment checks and the cache registry
//! - [`roster`] - the owning unit container
//! - [`board`] / [`terrain`] - geometry and external-subsystem ports
//! - [`rng`] - deterministic random port and fallback

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod attack;
pub mod attr;
pub mod board;
pub mod error;
pub mod filter;
pub mod modification;
pub mod rng;
pub mod roster;
pub mod terrain;
pub mod unit;
pub mod unit_type;
pub mod visibility;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::attack::{Attack, AttackEffect, AttackFilter};
    pub use crate::attr::{Attrs, Value};
    pub use crate::board::{adjacent_tiles, tiles_adjacent, BoardContext, Direction, Location};
    pub use crate::error::{GameError, Result};
    pub use crate::filter::{AdjacentFilter, FilterContext, FilterOp, UnitFilter, VisionFilter};
    pub use crate::modification::{Effect, EffectKind, ModKind, Modification, ModificationLedger};
    pub use crate::rng::{RandomSource, SeededRng};
    pub use crate::roster::{TemporaryPlacement, UnitRoster};
    pub use crate::terrain::{TerrainCatalog, TerrainId, TerrainTable, TerrainToken, UNREACHABLE};
    pub use crate::unit::{sort_units, Unit};
    pub use crate::unit_type::{Alignment, EraData, Gender, Race, TypeRegistry, UnitType};
    pub use crate::visibility::{find_visible_unit, VisibilityCacheRegistry};
}
