use std::fmt;

use serde::{Deserialize, Serialize};
use strata_world::{BlockColumn, ColumnEntry};

/// Block-selection policy applied to every column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Profile {
    #[default]
    Default,
    Elevation,
    Underground,
    Aquatic,
    Stronghold,
    Ore,
}

impl Profile {
    pub const ALL: [Profile; 6] = [
        Profile::Default,
        Profile::Elevation,
        Profile::Underground,
        Profile::Aquatic,
        Profile::Stronghold,
        Profile::Ore,
    ];

    /// Unknown names fall back to `Default`. The empty string is `Default` too.
    pub fn from_name(name: &str) -> Profile {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Profile::Default,
            "elevation" => Profile::Elevation,
            "underground" => Profile::Underground,
            "aquatic" => Profile::Aquatic,
            "stronghold" => Profile::Stronghold,
            "ore" => Profile::Ore,
            other => {
                log::warn!("unknown profile '{}', using default", other);
                Profile::Default
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Profile::Default => "default",
            Profile::Elevation => "elevation",
            Profile::Underground => "underground",
            Profile::Aquatic => "aquatic",
            Profile::Stronghold => "stronghold",
            Profile::Ore => "ore",
        }
    }

    /// Suffix of the output directory: empty for `Default`.
    pub fn dir_suffix(self) -> String {
        match self {
            Profile::Default => String::new(),
            p => format!("_{}", p.name()),
        }
    }

    /// Picks the blocks to paint from a prepared sky-to-bedrock column.
    /// The result is in push order (topmost first); paint it reversed.
    pub fn select<'a>(
        self,
        column: &[&'a ColumnEntry],
        is_transparent: impl Fn(&str) -> bool,
    ) -> Vec<&'a ColumnEntry> {
        match self {
            Profile::Default => select_surface(column, &is_transparent, |_| false),
            Profile::Elevation => {
                select_surface(column, &is_transparent, |e| e.block.id.contains("water"))
            }
            Profile::Underground => select_underground(column, &is_transparent, |_| true),
            Profile::Stronghold => select_underground(column, &is_transparent, is_structure),
            Profile::Aquatic => select_aquatic(column, &is_transparent),
            Profile::Ore => select_ore(column),
        }
    }
}

impl From<String> for Profile {
    fn from(s: String) -> Self {
        Profile::from_name(&s)
    }
}

impl From<Profile> for String {
    fn from(p: Profile) -> Self {
        p.name().to_string()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vertical filters applied before selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColumnFilter {
    pub y_min: Option<i32>,
    /// Blocks above this are dropped when it is positive.
    pub y_max: i32,
    pub trim_ceiling: bool,
}

/// Gap in y that ends the leading ceiling run.
pub const CEILING_GAP: i32 = 4;

impl ColumnFilter {
    /// Non-air entries sorted sky to bedrock, filtered and optionally ceiling-trimmed.
    pub fn prepare<'a>(&self, column: &'a BlockColumn) -> Vec<&'a ColumnEntry> {
        let mut out: Vec<&ColumnEntry> = column
            .sky_to_bedrock()
            .into_iter()
            .filter(|e| !e.block.is_air())
            .filter(|e| self.y_max <= 0 || e.y <= self.y_max)
            .filter(|e| self.y_min.is_none_or(|min| e.y >= min))
            .collect();
        if self.trim_ceiling {
            if let Some(start) = (1..out.len()).find(|&i| (out[i].y - out[i - 1].y).abs() > CEILING_GAP)
            {
                out.drain(..start);
            }
        }
        out
    }
}

fn see_through(e: &ColumnEntry, is_transparent: &impl Fn(&str) -> bool) -> bool {
    let id = e.block.id.as_str();
    is_transparent(id) || id.contains("water") || id.contains("kelp")
}

const STRUCTURE_MARKERS: [&str; 11] = [
    "cobblestone",
    "brick",
    "end",
    "iron_bars",
    "spawn",
    "egg",
    "bookshelf",
    "cobweb",
    "oak_planks",
    "chest",
    "door",
];

fn is_structure(e: &ColumnEntry) -> bool {
    STRUCTURE_MARKERS.iter().any(|m| e.block.id.contains(m))
}

const ORE_PRIORITY: [&str; 10] = [
    "minecraft:diamond_ore",
    "minecraft:emerald_ore",
    "minecraft:redstone_ore",
    "minecraft:gold_ore",
    "minecraft:iron_ore",
    "minecraft:lapis_ore",
    "minecraft:coal_ore",
    "minecraft:ancient_debris",
    "minecraft:nether_gold_ore",
    "minecraft:quartz_ore",
];

fn select_surface<'a>(
    column: &[&'a ColumnEntry],
    is_transparent: &impl Fn(&str) -> bool,
    skip: impl Fn(&ColumnEntry) -> bool,
) -> Vec<&'a ColumnEntry> {
    let mut out = Vec::new();
    for &e in column {
        if skip(e) {
            continue;
        }
        out.push(e);
        if !is_transparent(&e.block.id) {
            break;
        }
    }
    out
}

/// Where a downward scan currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Descent {
    /// Above the first solid block.
    Sky,
    /// Inside solid ground; `last_y` is the previous block seen.
    Ground { last_y: i32 },
    /// Below the first cavity; blocks are now candidates for painting.
    Cavity,
}

impl Descent {
    fn step(self, e: &ColumnEntry, see_through: bool) -> Descent {
        match self {
            Descent::Sky if see_through => Descent::Sky,
            Descent::Sky => Descent::Ground { last_y: e.y },
            Descent::Ground { last_y } => {
                if see_through || last_y - e.y - 1 > 0 {
                    Descent::Cavity
                } else {
                    Descent::Ground { last_y: e.y }
                }
            }
            Descent::Cavity => Descent::Cavity,
        }
    }
}

fn select_underground<'a>(
    column: &[&'a ColumnEntry],
    is_transparent: &impl Fn(&str) -> bool,
    wanted: impl Fn(&ColumnEntry) -> bool,
) -> Vec<&'a ColumnEntry> {
    let mut out = Vec::new();
    let mut state = Descent::Sky;
    for &e in column {
        state = state.step(e, see_through(e, is_transparent));
        if state != Descent::Cavity || !wanted(e) {
            continue;
        }
        out.push(e);
        if !is_transparent(&e.block.id) {
            break;
        }
    }
    out
}

fn select_aquatic<'a>(
    column: &[&'a ColumnEntry],
    is_transparent: &impl Fn(&str) -> bool,
) -> Vec<&'a ColumnEntry> {
    let mut out = Vec::new();
    let mut in_water = false;
    for &e in column {
        if e.block.id.contains("water") {
            in_water = true;
            out.push(e);
            continue;
        }
        if !in_water {
            if !is_transparent(&e.block.id) {
                break;
            }
            continue;
        }
        out.push(e);
        if !is_transparent(&e.block.id) {
            break;
        }
    }
    if in_water { out } else { Vec::new() }
}

fn select_ore<'a>(column: &[&'a ColumnEntry]) -> Vec<&'a ColumnEntry> {
    ORE_PRIORITY
        .iter()
        .find_map(|ore| column.iter().find(|e| e.block.id == *ore))
        .map(|&e| vec![e])
        .unwrap_or_default()
}
