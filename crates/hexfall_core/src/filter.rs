//! The unit query/filter engine.
//!
//! A [`UnitFilter`] is a flat list of field-match clauses plus an ordered
//! list of `and`/`or`/`not` connectives. The connectives are folded
//! left-to-right against the already-computed flat-clause result - in
//! document order, *not* via operator precedence. That is intentional: it
//! keeps evaluation a single scan and matches how scenario authors read
//! nested condition blocks.

use tracing::debug;

use crate::attr::Attrs;
use crate::board::{adjacent_tiles, BoardContext, Direction, Location};
use crate::terrain::TerrainCatalog;
use crate::unit::Unit;
use crate::unit_type::Gender;

/// CSV membership with an equality fast path.
///
/// Splitting only happens when a comma is actually present; plain fields
/// cost one comparison.
#[must_use]
pub fn list_contains(list: &str, value: &str) -> bool {
    if list == value {
        return true;
    }
    if !list.contains(',') {
        return false;
    }
    list.split(',').any(|entry| entry.trim() == value)
}

/// Parse a range list like `"1-3,5"` into inclusive pairs.
///
/// A bare number is a single-value range. Malformed entries are skipped.
#[must_use]
pub fn parse_ranges(text: &str) -> Vec<(i32, i32)> {
    let mut ranges = Vec::new();
    for entry in text.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parsed = match entry.split_once('-') {
            Some((lo, hi)) => lo
                .trim()
                .parse::<i32>()
                .ok()
                .zip(hi.trim().parse::<i32>().ok()),
            None => entry.parse::<i32>().ok().map(|n| (n, n)),
        };
        match parsed {
            Some(range) => ranges.push(range),
            None => debug!(entry, "Skipping malformed range entry"),
        }
    }
    ranges
}

/// True when the value falls in any of the ranges.
#[must_use]
pub fn in_ranges(value: i32, ranges: &[(i32, i32)]) -> bool {
    ranges.iter().any(|&(lo, hi)| value >= lo && value <= hi)
}

/// True when the (0-based) location matches 1-based range expressions.
/// Empty expressions match everything.
#[must_use]
pub fn location_matches_range(loc: Location, x_ranges: &str, y_ranges: &str) -> bool {
    if !x_ranges.is_empty() && !in_ranges(loc.x + 1, &parse_ranges(x_ranges)) {
        return false;
    }
    if !y_ranges.is_empty() && !in_ranges(loc.y + 1, &parse_ranges(y_ranges)) {
        return false;
    }
    true
}

/// One boolean connective child, applied in document order.
#[derive(Debug, Clone)]
pub enum FilterOp {
    /// `result = result && matches(filter)`
    And(Box<UnitFilter>),
    /// `result = result || matches(filter)`
    Or(Box<UnitFilter>),
    /// `result = result && !matches(filter)`
    Not(Box<UnitFilter>),
}

/// Visibility sub-filter: the unit must (or must not) be visible to a set
/// of viewing sides.
#[derive(Debug, Clone)]
pub struct VisionFilter {
    /// Expected visibility (default true).
    pub visible: bool,
    /// Range list of viewing sides; `None` means all enemies of the unit.
    pub viewing_sides: Option<String>,
}

impl Default for VisionFilter {
    fn default() -> Self {
        Self {
            visible: true,
            viewing_sides: None,
        }
    }
}

/// Adjacency sub-filter: count adjacent units matching a nested filter.
#[derive(Debug, Clone, Default)]
pub struct AdjacentFilter {
    /// Nested filter the adjacent unit must match.
    pub filter: UnitFilter,
    /// CSV of directions to inspect; `None` means all six.
    pub adjacent: Option<String>,
    /// Constrain to enemies (`Some(true)`) or allies (`Some(false)`).
    pub is_enemy: Option<bool>,
    /// Range list for the required match count; default `1-6`.
    pub count: Option<String>,
}

/// A structured predicate over a unit and its board context.
///
/// Every field is optional; `None` clauses always pass. String-list
/// fields are CSV memberships.
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    /// Unit id (CSV).
    pub id: Option<String>,
    /// Personal name (CSV).
    pub name: Option<String>,
    /// Alternative spelling for id, common in dialogue filters (CSV).
    pub speaker: Option<String>,
    /// Type ids (CSV).
    pub unit_type: Option<String>,
    /// Ability ids (CSV).
    pub ability: Option<String>,
    /// Owning sides (CSV of side numbers).
    pub side: Option<String>,
    /// Race id.
    pub race: Option<String>,
    /// Gender.
    pub gender: Option<Gender>,
    /// Leader flag.
    pub can_recruit: Option<bool>,
    /// Exact level.
    pub level: Option<i32>,
    /// Exact defense modifier at the evaluation location.
    pub defense: Option<i32>,
    /// Exact movement cost at the evaluation location.
    pub movement_cost: Option<i32>,
    /// An attack with this id must exist.
    pub has_weapon: Option<String>,
    /// AI role tag.
    pub role: Option<String>,
    /// AI special tag.
    pub ai_special: Option<String>,
    /// 1-based x range expression; `"recall"` (with y) matches off-board.
    pub x: Option<String>,
    /// 1-based y range expression.
    pub y: Option<String>,
    /// Opaque location sub-filter, evaluated by the board port.
    pub filter_location: Option<Attrs>,
    /// Visibility sub-filters (all must pass).
    pub filter_vision: Vec<VisionFilter>,
    /// Adjacency sub-filters (all must pass).
    pub filter_adjacent: Vec<AdjacentFilter>,
    /// The unit's id must appear in this stored variable.
    pub find_in: Option<String>,
    /// Opaque scripted expression, evaluated by the board port.
    pub formula: Option<String>,
    /// Ordered boolean connectives, folded left-to-right.
    pub ops: Vec<FilterOp>,
}

/// Context handed to filter evaluation.
///
/// Location-dependent clauses require the corresponding port; evaluating
/// one without it is a caller bug, not a recoverable error.
#[derive(Clone, Copy, Default)]
pub struct FilterContext<'a> {
    /// Board/teams port.
    pub board: Option<&'a dyn BoardContext>,
    /// Terrain info port.
    pub terrain: Option<&'a dyn TerrainCatalog>,
    /// Evaluate ignoring time-of-day lighting (forwarded to the location
    /// sub-filter port).
    pub flat_time_of_day: bool,
}

impl std::fmt::Debug for FilterContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterContext")
            .field("board", &self.board.is_some())
            .field("terrain", &self.terrain.is_some())
            .field("flat_time_of_day", &self.flat_time_of_day)
            .finish()
    }
}

impl Unit {
    /// Evaluate a filter against this unit.
    ///
    /// `loc` is the unit's evaluation location; `None` marks a recall-list
    /// unit. The flat clauses evaluate first, then the ordered
    /// `and`/`or`/`not` children fold over the result in document order.
    ///
    /// # Panics
    ///
    /// Asserts when a location-dependent clause is evaluated without the
    /// context it needs (missing board/terrain port) - a programming
    /// error, not user-facing input.
    #[must_use]
    pub fn matches_filter(
        &self,
        filter: &UnitFilter,
        loc: Option<Location>,
        ctx: &FilterContext<'_>,
    ) -> bool {
        if loc.is_some() {
            assert!(
                ctx.board.is_some(),
                "on-board filter evaluation requires a board context"
            );
        }
        let mut matches = self.internal_matches_filter(filter, loc, ctx);

        // [and]/[or]/[not] in document order, folded left-to-right.
        for op in &filter.ops {
            match op {
                FilterOp::And(sub) => {
                    matches = matches && self.matches_filter(sub, loc, ctx);
                }
                FilterOp::Or(sub) => {
                    matches = matches || self.matches_filter(sub, loc, ctx);
                }
                FilterOp::Not(sub) => {
                    matches = matches && !self.matches_filter(sub, loc, ctx);
                }
            }
        }
        matches
    }

    #[allow(clippy::too_many_lines)]
    fn internal_matches_filter(
        &self,
        filter: &UnitFilter,
        loc: Option<Location>,
        ctx: &FilterContext<'_>,
    ) -> bool {
        if let Some(name) = &filter.name {
            if !list_contains(name, self.name()) {
                return false;
            }
        }
        if let Some(id) = &filter.id {
            if !list_contains(id, self.id()) {
                return false;
            }
        }
        // 'speaker' is a widely-used alternative to id.
        if let Some(speaker) = &filter.speaker {
            if !list_contains(speaker, self.id()) {
                return false;
            }
        }

        if let Some(location_filter) = &filter.filter_location {
            let board = ctx
                .board
                .expect("filter_location requires a board context");
            let loc = loc.expect("filter_location requires a location");
            if !board.matches_location_filter(location_filter, loc, ctx.flat_time_of_day) {
                return false;
            }
        }

        let x = filter.x.as_deref().unwrap_or("");
        let y = filter.y.as_deref().unwrap_or("");
        if !x.is_empty() || !y.is_empty() {
            if x == "recall" && y == "recall" {
                // On-board locations are not on a recall list.
                match (loc, ctx.board) {
                    (Some(loc), Some(board)) if board.on_board(loc) => return false,
                    (Some(_), None) => return false,
                    _ => {}
                }
            } else {
                match loc {
                    Some(loc) => {
                        if !location_matches_range(loc, x, y) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }

        if let Some(types) = &filter.unit_type {
            if !list_contains(types, self.type_id()) {
                return false;
            }
        }

        if let Some(abilities) = &filter.ability {
            let mut found = self.has_ability_by_id(abilities);
            if !found && abilities.contains(',') {
                found = abilities
                    .split(',')
                    .any(|ability| self.has_ability_by_id(ability.trim()));
            }
            if !found {
                return false;
            }
        }

        if let Some(race) = &filter.race {
            if self.race() != race {
                return false;
            }
        }

        if let Some(gender) = filter.gender {
            if self.gender() != gender {
                return false;
            }
        }

        if let Some(sides) = &filter.side {
            if !list_contains(sides, &self.side().to_string()) {
                return false;
            }
        }

        if let Some(weapon) = &filter.has_weapon {
            if !self.attacks().iter().any(|attack| attack.id == *weapon) {
                return false;
            }
        }

        if let Some(role) = &filter.role {
            if self.role() != role {
                return false;
            }
        }

        if let Some(ai_special) = &filter.ai_special {
            if self.ai_special() != ai_special {
                return false;
            }
        }

        if let Some(can_recruit) = filter.can_recruit {
            if self.can_recruit() != can_recruit {
                return false;
            }
        }

        if let Some(level) = filter.level {
            if self.level() != level {
                return false;
            }
        }

        if filter.defense.is_some() || filter.movement_cost.is_some() {
            let board = ctx
                .board
                .expect("terrain-dependent filter clauses require a board context");
            let terrain_info = ctx
                .terrain
                .expect("terrain-dependent filter clauses require a terrain catalog");
            let loc = loc.expect("terrain-dependent filter clauses require a location");
            let terrain = board.terrain_at(loc);
            if let Some(defense) = filter.defense {
                let actual = terrain
                    .as_ref()
                    .map_or(100, |t| self.defense_modifier(t, terrain_info));
                if actual != defense {
                    return false;
                }
            }
            if let Some(movement_cost) = filter.movement_cost {
                let actual = terrain
                    .as_ref()
                    .map_or(crate::terrain::UNREACHABLE, |t| {
                        self.movement_cost(t, terrain_info)
                    });
                if actual != movement_cost {
                    return false;
                }
            }
        }

        for vision in &filter.filter_vision {
            let board = ctx.board.expect("filter_vision requires a board context");
            let loc = loc.expect("filter_vision requires a location");
            let mut viewers: Vec<u32> = Vec::new();
            match &vision.viewing_sides {
                Some(ranges) => {
                    for (lo, hi) in parse_ranges(ranges) {
                        for side in lo..=hi {
                            if side > 0 && side as u32 <= board.side_count() {
                                viewers.push(side as u32);
                            }
                        }
                    }
                }
                None => {
                    // Default to every enemy of this unit's side.
                    for side in 1..=board.side_count() {
                        if board.is_enemy(self.side(), side) {
                            viewers.push(side);
                        }
                    }
                }
            }
            if viewers.is_empty() {
                return false;
            }
            for viewer in viewers {
                let not_fogged = !board.fogged(viewer, loc);
                let not_hiding = !self.invisible(loc, board, true);
                if (vision.visible != not_fogged) && not_hiding {
                    return false;
                }
            }
        }

        for adjacent_filter in &filter.filter_adjacent {
            let board = ctx.board.expect("filter_adjacent requires a board context");
            let loc = loc.expect("filter_adjacent requires a location");
            let tiles = adjacent_tiles(loc);
            let directions: Vec<Direction> = match &adjacent_filter.adjacent {
                Some(csv) => csv.split(',').filter_map(Direction::parse).collect(),
                None => Direction::ALL.to_vec(),
            };
            let mut match_count = 0;
            for dir in directions {
                let adj = tiles[dir.index()];
                let Some(other) = board.unit_at(adj) else {
                    continue;
                };
                if !other.matches_filter(&adjacent_filter.filter, Some(adj), ctx) {
                    continue;
                }
                match adjacent_filter.is_enemy {
                    None => match_count += 1,
                    Some(expected) => {
                        if board.is_enemy(self.side(), other.side()) == expected {
                            match_count += 1;
                        }
                    }
                }
            }
            let counts = match &adjacent_filter.count {
                Some(ranges) => parse_ranges(ranges),
                None => vec![(1, 6)],
            };
            if !in_ranges(match_count, &counts) {
                return false;
            }
        }

        if let Some(variable) = &filter.find_in {
            let board = ctx.board.expect("find_in requires a board context");
            match board.stored_unit_ids(variable) {
                None => return false,
                Some(ids) => {
                    if !ids.iter().any(|id| id == self.id()) {
                        return false;
                    }
                }
            }
        }

        if let Some(formula) = &filter.formula {
            let board = ctx.board.expect("formula requires a board context");
            let loc = loc.unwrap_or_default();
            if !board.eval_formula(formula, self, loc) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_contains_fast_path_and_csv() {
        assert!(list_contains("spearman", "spearman"));
        assert!(!list_contains("spearman", "spear"));
        assert!(list_contains("archer, spearman,mage", "spearman"));
        assert!(!list_contains("archer,mage", "spearman"));
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(parse_ranges("1-3,5"), vec![(1, 3), (5, 5)]);
        assert_eq!(parse_ranges("4"), vec![(4, 4)]);
        assert_eq!(parse_ranges("oops,2"), vec![(2, 2)]);
        assert!(parse_ranges("").is_empty());
    }

    #[test]
    fn test_in_ranges() {
        let ranges = parse_ranges("1-3,7");
        assert!(in_ranges(2, &ranges));
        assert!(in_ranges(7, &ranges));
        assert!(!in_ranges(5, &ranges));
    }

    #[test]
    fn test_location_ranges_are_one_based() {
        let loc = Location::new(0, 2);
        assert!(location_matches_range(loc, "1", "3"));
        assert!(!location_matches_range(loc, "2", "3"));
        assert!(location_matches_range(loc, "", ""));
    }

    use crate::attack::Attack;
    use crate::unit_type::{TypeRegistry, UnitType};

    fn fixture_unit() -> Unit {
        let mut registry = TypeRegistry::new();
        registry.insert_type(UnitType {
            id: "archer".to_string(),
            name: "Archer".to_string(),
            race: "human".to_string(),
            hitpoints: 28,
            movement: 6,
            level: 1,
            attacks: vec![Attack {
                id: "bow".to_string(),
                name: "bow".to_string(),
                attack_type: "pierce".to_string(),
                range: "ranged".to_string(),
                damage: 6,
                number: 3,
            }],
            ..UnitType::default()
        });
        let ty = registry.resolve("archer").unwrap();
        Unit::from_type(&registry, ty, 2, false, None, "", None).unwrap()
    }

    #[test]
    fn test_flat_clauses() {
        let unit = fixture_unit();
        let ctx = FilterContext::default();

        assert!(unit.matches_filter(&UnitFilter::default(), None, &ctx));
        let by_type = UnitFilter {
            unit_type: Some("spearman,archer".to_string()),
            ..UnitFilter::default()
        };
        assert!(unit.matches_filter(&by_type, None, &ctx));
        let by_side = UnitFilter {
            side: Some("1,3".to_string()),
            ..UnitFilter::default()
        };
        assert!(!unit.matches_filter(&by_side, None, &ctx));
        let by_weapon = UnitFilter {
            has_weapon: Some("bow".to_string()),
            ..UnitFilter::default()
        };
        assert!(unit.matches_filter(&by_weapon, None, &ctx));
        let by_level = UnitFilter {
            level: Some(2),
            ..UnitFilter::default()
        };
        assert!(!unit.matches_filter(&by_level, None, &ctx));
    }

    #[test]
    fn test_connectives_fold_in_document_order() {
        let unit = fixture_unit();
        let ctx = FilterContext::default();
        let always = UnitFilter::default();
        let never = UnitFilter {
            id: Some("nobody".to_string()),
            ..UnitFilter::default()
        };

        // Document order folds ((base or X) and never) = false, where
        // precedence parsing would give (base or (X and never)) = true.
        let filter = UnitFilter {
            ops: vec![
                FilterOp::Or(Box::new(always.clone())),
                FilterOp::And(Box::new(never.clone())),
            ],
            ..UnitFilter::default()
        };
        assert!(!unit.matches_filter(&filter, None, &ctx));

        // not folds as and-not.
        let filter = UnitFilter {
            ops: vec![FilterOp::Not(Box::new(never))],
            ..UnitFilter::default()
        };
        assert!(unit.matches_filter(&filter, None, &ctx));
        let filter = UnitFilter {
            ops: vec![FilterOp::Not(Box::new(always))],
            ..UnitFilter::default()
        };
        assert!(!unit.matches_filter(&filter, None, &ctx));
    }

    #[test]
    fn test_recall_location_clause() {
        let unit = fixture_unit();
        let ctx = FilterContext::default();
        let recall_only = UnitFilter {
            x: Some("recall".to_string()),
            y: Some("recall".to_string()),
            ..UnitFilter::default()
        };
        // A unit with no location is a recall-list unit.
        assert!(unit.matches_filter(&recall_only, None, &ctx));

        let ranged = UnitFilter {
            x: Some("1-5".to_string()),
            y: Some("1-5".to_string()),
            ..UnitFilter::default()
        };
        assert!(!unit.matches_filter(&ranged, None, &ctx));
    }
}
