//! Test fixtures and helpers.
//!
//! Pre-built registries, terrain tables and a minimal board context for
//! consistent testing across crates.

use std::collections::{BTreeMap, BTreeSet};

use hexfall_core::prelude::*;

/// Build the movement-type parent document shared by infantry fixtures.
fn smallfoot() -> Attrs {
    let mut doc = Attrs::new();
    let mut costs = Attrs::new();
    costs.set("grassland", 1);
    costs.set("forest", 2);
    costs.set("hills", 3);
    doc.add_child("movement_costs", costs);
    let mut defense = Attrs::new();
    defense.set("grassland", 60);
    defense.set("forest", 50);
    defense.set("hills", 40);
    doc.add_child("defense", defense);
    let mut resistance = Attrs::new();
    resistance.set("blade", 100);
    resistance.set("pierce", 100);
    resistance.set("impact", 100);
    doc.add_child("resistance", resistance);
    doc
}

fn melee(id: &str, attack_type: &str, damage: i32, number: i32) -> Attack {
    Attack {
        id: id.to_string(),
        name: id.to_string(),
        attack_type: attack_type.to_string(),
        range: "melee".to_string(),
        damage,
        number,
    }
}

/// The standard trait pool: strong, quick, resilient, intelligent.
#[must_use]
pub fn standard_traits() -> Vec<Modification> {
    let mut strong = Modification::with_id("strong");
    strong.name = "strong".to_string();
    strong.effects.push(Effect::of(EffectKind::Attack(AttackEffect {
        filter: AttackFilter {
            range: Some("melee".to_string()),
            ..AttackFilter::default()
        },
        increase_damage: Some("1".to_string()),
        ..AttackEffect::default()
    })));
    strong.effects.push(Effect::of(EffectKind::Hitpoints {
        increase: None,
        increase_total: Some("1".to_string()),
        set: None,
        set_total: None,
        heal_full: false,
        violate_maximum: false,
    }));

    let mut quick = Modification::with_id("quick");
    quick.name = "quick".to_string();
    quick.effects.push(Effect::of(EffectKind::Movement {
        increase: Some("1".to_string()),
        set: None,
    }));
    quick.effects.push(Effect::of(EffectKind::Hitpoints {
        increase: None,
        increase_total: Some("-5%".to_string()),
        set: None,
        set_total: None,
        heal_full: false,
        violate_maximum: false,
    }));

    let mut resilient = Modification::with_id("resilient");
    resilient.name = "resilient".to_string();
    resilient.effects.push(Effect::of(EffectKind::Hitpoints {
        increase: None,
        increase_total: Some("4".to_string()),
        set: None,
        set_total: None,
        heal_full: false,
        violate_maximum: false,
    }));

    let mut intelligent = Modification::with_id("intelligent");
    intelligent.name = "intelligent".to_string();
    intelligent.effects.push(Effect::of(EffectKind::MaxExperience {
        increase: Some("-20%".to_string()),
    }));

    vec![strong, quick, resilient, intelligent]
}

/// Registry with a small roster of interlinked fixture types.
///
/// - `spearman` (level 1, 30 hp, 5 mv) advances to `swordsman`
/// - `recruit` rolls two traits from the standard pool, male or female
/// - `skeleton` carries a musthave `undead` trait
/// - `nightprowler` has a `hides`-kind ability
#[must_use]
pub fn sample_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();

    registry.insert_race(Race {
        id: "human".to_string(),
        male_names: vec![
            "Aldric".to_string(),
            "Bertrand".to_string(),
            "Corwin".to_string(),
        ],
        female_names: vec![
            "Adela".to_string(),
            "Brienne".to_string(),
            "Cerys".to_string(),
        ],
    });
    registry.insert_movement_type("smallfoot", smallfoot());

    registry.insert_type(UnitType {
        id: "spearman".to_string(),
        name: "Spearman".to_string(),
        description: "Sturdy line infantry.".to_string(),
        race: "human".to_string(),
        hitpoints: 30,
        movement: 5,
        experience: 40,
        level: 1,
        alignment: Alignment::Lawful,
        cost: 14,
        attacks: vec![melee("spear", "pierce", 7, 3)],
        advances_to: vec!["swordsman".to_string()],
        movement_type: Some("smallfoot".to_string()),
        ..UnitType::default()
    });

    registry.insert_type(UnitType {
        id: "swordsman".to_string(),
        name: "Swordsman".to_string(),
        race: "human".to_string(),
        hitpoints: 42,
        movement: 5,
        experience: 80,
        level: 2,
        alignment: Alignment::Lawful,
        cost: 24,
        attacks: vec![melee("sword", "blade", 8, 4)],
        movement_type: Some("smallfoot".to_string()),
        ..UnitType::default()
    });

    let mut amla = Modification::with_id("amla_tough");
    amla.max_times = 3;
    amla.effects.push(Effect::of(EffectKind::Hitpoints {
        increase: None,
        increase_total: Some("3".to_string()),
        set: None,
        set_total: None,
        heal_full: true,
        violate_maximum: false,
    }));
    registry.insert_type(UnitType {
        id: "recruit".to_string(),
        name: "Recruit".to_string(),
        race: "human".to_string(),
        hitpoints: 28,
        movement: 5,
        experience: 36,
        level: 1,
        cost: 12,
        attacks: vec![melee("sword", "blade", 6, 3)],
        num_traits: 2,
        possible_traits: standard_traits(),
        genders: vec![Gender::Male, Gender::Female],
        advancements: vec![amla],
        movement_type: Some("smallfoot".to_string()),
        ..UnitType::default()
    });

    let mut undead = Modification::with_id("undead");
    undead.name = "undead".to_string();
    undead.availability = Some("musthave".to_string());
    undead.effects.push(Effect::of(EffectKind::Status {
        add: Some("not_living".to_string()),
        remove: None,
    }));
    registry.insert_type(UnitType {
        id: "skeleton".to_string(),
        name: "Skeleton".to_string(),
        race: "undead".to_string(),
        hitpoints: 34,
        movement: 5,
        experience: 35,
        level: 1,
        alignment: Alignment::Chaotic,
        cost: 15,
        attacks: vec![melee("axe", "blade", 7, 3)],
        num_traits: 1,
        possible_traits: {
            let mut pool = vec![undead];
            pool.extend(standard_traits());
            pool
        },
        movement_type: Some("smallfoot".to_string()),
        ..UnitType::default()
    });

    let mut prowler_attrs = Attrs::new();
    let mut abilities = Attrs::new();
    let mut ambush = Attrs::new();
    ambush.set("id", "ambush");
    ambush.set("name", "ambush");
    abilities.add_child("hides", ambush);
    prowler_attrs.add_child("abilities", abilities);
    registry.insert_type(UnitType {
        id: "nightprowler".to_string(),
        name: "Nightprowler".to_string(),
        race: "human".to_string(),
        hitpoints: 26,
        movement: 6,
        experience: 44,
        level: 1,
        alignment: Alignment::Chaotic,
        cost: 18,
        attacks: vec![melee("dagger", "blade", 5, 4)],
        movement_type: Some("smallfoot".to_string()),
        attrs: prowler_attrs,
        ..UnitType::default()
    });

    registry
}

/// Terrain table matching the fixture movement type.
///
/// `wooded_hills` is an alias of forest and hills: movement takes the
/// best (cheapest) of the two, defense the worst (MINUS composition).
#[must_use]
pub fn sample_terrain() -> TerrainTable {
    let mut table = TerrainTable::new();
    table.insert(
        TerrainId::new("Gg"),
        terrain_def("grassland", Vec::new(), Vec::new()),
    );
    table.insert(
        TerrainId::new("Ff"),
        terrain_def("forest", Vec::new(), Vec::new()),
    );
    table.insert(
        TerrainId::new("Hh"),
        terrain_def("hills", Vec::new(), Vec::new()),
    );
    table.insert(
        TerrainId::new("Wh"),
        terrain_def(
            "wooded_hills",
            vec![
                TerrainToken::Terrain(TerrainId::new("Ff")),
                TerrainToken::Terrain(TerrainId::new("Hh")),
            ],
            vec![
                TerrainToken::Minus,
                TerrainToken::Terrain(TerrainId::new("Ff")),
                TerrainToken::Terrain(TerrainId::new("Hh")),
            ],
        ),
    );
    table
}

fn terrain_def(
    display: &str,
    mvt_alias: Vec<TerrainToken>,
    def_alias: Vec<TerrainToken>,
) -> hexfall_core::terrain::TerrainDef {
    hexfall_core::terrain::TerrainDef {
        display: display.to_string(),
        mvt_alias,
        def_alias,
    }
}

/// Minimal board context over a roster: every side is everyone's enemy,
/// fog is an explicit set, terrain an explicit map.
#[derive(Debug, Default)]
pub struct TestBoard {
    /// The units on the board.
    pub roster: UnitRoster,
    /// Terrain per location; unset locations read as `None`.
    pub terrain: BTreeMap<Location, TerrainId>,
    /// `(side, location)` pairs under fog.
    pub fog: BTreeSet<(u32, Location)>,
    /// Number of sides in play.
    pub sides: u32,
    /// Board bounds (exclusive), for `on_board`.
    pub width: i32,
    /// Board bounds (exclusive), for `on_board`.
    pub height: i32,
    /// Stored unit-id lists for `find_in` clauses.
    pub stored: BTreeMap<String, Vec<String>>,
}

impl TestBoard {
    /// A `width` x `height` board with `sides` mutually hostile sides.
    #[must_use]
    pub fn new(width: i32, height: i32, sides: u32) -> Self {
        Self {
            roster: UnitRoster::new(),
            terrain: BTreeMap::new(),
            fog: BTreeSet::new(),
            sides,
            width,
            height,
            stored: BTreeMap::new(),
        }
    }

    /// Place a unit.
    pub fn place(&mut self, loc: Location, unit: Unit) {
        self.roster.insert(loc, unit);
    }

    /// Fog a location for one side.
    pub fn fog_for(&mut self, side: u32, loc: Location) {
        self.fog.insert((side, loc));
    }
}

impl BoardContext for TestBoard {
    fn unit_at(&self, loc: Location) -> Option<&Unit> {
        self.roster.get(loc)
    }

    fn terrain_at(&self, loc: Location) -> Option<TerrainId> {
        self.terrain.get(&loc).cloned()
    }

    fn on_board(&self, loc: Location) -> bool {
        loc.x >= 0 && loc.y >= 0 && loc.x < self.width && loc.y < self.height
    }

    fn side_count(&self) -> u32 {
        self.sides
    }

    fn is_enemy(&self, side: u32, other: u32) -> bool {
        side != other
    }

    fn fogged(&self, viewer_side: u32, loc: Location) -> bool {
        self.fog.contains(&(viewer_side, loc))
    }

    fn visibility_registry(&self) -> &VisibilityCacheRegistry {
        self.roster.visibility_registry()
    }

    fn stored_unit_ids(&self, variable: &str) -> Option<Vec<String>> {
        self.stored.get(variable).cloned()
    }
}

/// Spawn a fixture unit with no random traits.
#[must_use]
pub fn spawn(registry: &TypeRegistry, type_id: &str, side: u32) -> Unit {
    let ty = registry
        .resolve(type_id)
        .unwrap_or_else(|e| panic!("fixture type missing: {e}"));
    Unit::from_type(registry, ty, side, false, None, "", None)
        .unwrap_or_else(|e| panic!("fixture spawn failed: {e}"))
}

/// Spawn a concealed `nightprowler` (hidden status armed).
#[must_use]
pub fn spawn_hidden(registry: &TypeRegistry, side: u32) -> Unit {
    let mut unit = spawn(registry, "nightprowler", side);
    unit.set_state("hidden", "yes");
    unit
}
