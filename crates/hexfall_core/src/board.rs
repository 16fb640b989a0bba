//! Board geometry and the board/teams context port.
//!
//! The engine itself owns no map. Location-dependent operations (filter
//! clauses, visibility) receive a [`BoardContext`] implemented by the
//! embedding game state, which answers unit, terrain, fog and enmity
//! queries.

use serde::{Deserialize, Serialize};

use crate::attr::Attrs;
use crate::terrain::TerrainId;
use crate::unit::Unit;
use crate::visibility::VisibilityCacheRegistry;

/// A hex-grid location.
///
/// Columns with odd `x` are shifted half a hex down; savegame/WML range
/// expressions are 1-based while this struct is 0-based.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Location {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Location {
    /// Create a location.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One of the six hex directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// North.
    North,
    /// North-east.
    NorthEast,
    /// South-east.
    SouthEast,
    /// South.
    South,
    /// South-west.
    SouthWest,
    /// North-west.
    NorthWest,
}

impl Direction {
    /// All six directions, in the order adjacency arrays use.
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::NorthEast,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::NorthWest,
    ];

    /// Parse the short form used in data (`n`, `ne`, `se`, `s`, `sw`, `nw`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "n" => Some(Direction::North),
            "ne" => Some(Direction::NorthEast),
            "se" => Some(Direction::SouthEast),
            "s" => Some(Direction::South),
            "sw" => Some(Direction::SouthWest),
            "nw" => Some(Direction::NorthWest),
            _ => None,
        }
    }

    /// Short form used in data files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::North => "n",
            Direction::NorthEast => "ne",
            Direction::SouthEast => "se",
            Direction::South => "s",
            Direction::SouthWest => "sw",
            Direction::NorthWest => "nw",
        }
    }

    /// Index into the array returned by [`adjacent_tiles`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::NorthEast => 1,
            Direction::SouthEast => 2,
            Direction::South => 3,
            Direction::SouthWest => 4,
            Direction::NorthWest => 5,
        }
    }
}

/// The six neighbours of `loc`, indexed per [`Direction::index`].
#[must_use]
pub fn adjacent_tiles(loc: Location) -> [Location; 6] {
    let odd = loc.x.rem_euclid(2) == 1;
    let up = if odd { 0 } else { -1 };
    let down = if odd { 1 } else { 0 };
    [
        Location::new(loc.x, loc.y - 1),
        Location::new(loc.x + 1, loc.y + up),
        Location::new(loc.x + 1, loc.y + down),
        Location::new(loc.x, loc.y + 1),
        Location::new(loc.x - 1, loc.y + down),
        Location::new(loc.x - 1, loc.y + up),
    ]
}

/// True when the two locations share a hex edge.
#[must_use]
pub fn tiles_adjacent(a: Location, b: Location) -> bool {
    adjacent_tiles(a).contains(&b)
}

/// Board and team queries supplied by the embedding game state.
///
/// Required only for location-dependent filter clauses and visibility
/// checks; pure stat queries never touch it.
pub trait BoardContext {
    /// Unit standing at a location, if any.
    fn unit_at(&self, loc: Location) -> Option<&Unit>;

    /// Terrain at a location, if the location is on the board.
    fn terrain_at(&self, loc: Location) -> Option<TerrainId>;

    /// True when the location lies on the playable board.
    fn on_board(&self, loc: Location) -> bool;

    /// Number of sides in play. Sides are numbered from 1.
    fn side_count(&self) -> u32;

    /// True when the two sides are enemies.
    fn is_enemy(&self, side: u32, other: u32) -> bool;

    /// True when `loc` is under fog from `viewer_side`'s point of view.
    fn fogged(&self, viewer_side: u32, loc: Location) -> bool;

    /// Registry of units holding an active visibility cache.
    ///
    /// Owned by the unit container; exposed here so concealment checks can
    /// register cache writers for later sweeps.
    fn visibility_registry(&self) -> &VisibilityCacheRegistry;

    /// Unit ids stored under a scenario variable, for `find_in` clauses.
    ///
    /// `None` means the variable does not exist (the clause then fails).
    fn stored_unit_ids(&self, variable: &str) -> Option<Vec<String>> {
        let _ = variable;
        None
    }

    /// Evaluate an opaque location sub-filter at `loc`.
    ///
    /// The terrain-filter language belongs to the map subsystem; embeddings
    /// without one accept every location.
    fn matches_location_filter(
        &self,
        filter: &Attrs,
        loc: Location,
        flat_time_of_day: bool,
    ) -> bool {
        let _ = (filter, loc, flat_time_of_day);
        true
    }

    /// Evaluate an opaque scripted expression against a unit.
    ///
    /// The formula sub-language is external; embeddings without an
    /// interpreter accept every formula.
    fn eval_formula(&self, formula: &str, unit: &Unit, loc: Location) -> bool {
        let _ = (formula, unit, loc);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacency_is_symmetric() {
        for x in -2..4 {
            for y in -2..4 {
                let loc = Location::new(x, y);
                for adj in adjacent_tiles(loc) {
                    assert!(
                        tiles_adjacent(adj, loc),
                        "{adj:?} not adjacent back to {loc:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_adjacency_distinct_neighbours() {
        let tiles = adjacent_tiles(Location::new(3, 3));
        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_direction_round_trip() {
        for dir in Direction::ALL {
            assert_eq!(Direction::parse(dir.as_str()), Some(dir));
        }
        assert_eq!(Direction::parse("x"), None);
    }
}
