//! Organisational hierarchy: zone ← region ← plant ← vehicle
//!
//! Joins are always built as a leaf→root chain of equi-joins, so a query
//! naming two levels picks up every level between them.

use serde::{Deserialize, Serialize};

/// Hierarchy levels ordered leaf first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Vehicle,
    Plant,
    Region,
    Zone,
}

impl Level {
    pub const LEAF_TO_ROOT: [Level; 4] = [Level::Vehicle, Level::Plant, Level::Region, Level::Zone];

    pub fn table(self) -> &'static str {
        match self {
            Level::Vehicle => "vehicle_master",
            Level::Plant => "hosp_master",
            Level::Region => "district_master",
            Level::Zone => "zone_master",
        }
    }

    pub fn alias(self) -> &'static str {
        match self {
            Level::Vehicle => "vm",
            Level::Plant => "hm",
            Level::Region => "dm",
            Level::Zone => "zm",
        }
    }

    /// Qualified column holding the display name of the level
    pub fn name_column(self) -> &'static str {
        match self {
            Level::Vehicle => "vm.reg_no",
            Level::Plant => "hm.name",
            Level::Region => "dm.name",
            Level::Zone => "zm.zone_name",
        }
    }

    /// Output alias for the name column
    pub fn name_alias(self) -> &'static str {
        match self {
            Level::Vehicle => "reg_no",
            Level::Plant => "plant_name",
            Level::Region => "region_name",
            Level::Zone => "zone_name",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Vehicle => "vehicle",
            Level::Plant => "plant",
            Level::Region => "region",
            Level::Zone => "zone",
        }
    }

    /// Foreign key on this level's table pointing at its parent's `id_no`
    pub fn parent_key(self) -> Option<(&'static str, Level)> {
        match self {
            Level::Vehicle => Some(("id_hosp", Level::Plant)),
            Level::Plant => Some(("id_dist", Level::Region)),
            Level::Region => Some(("id_zone", Level::Zone)),
            Level::Zone => None,
        }
    }

    pub fn from_table(table: &str) -> Option<Level> {
        let bare = table.rsplit('.').next().unwrap_or(table);
        Level::LEAF_TO_ROOT
            .into_iter()
            .find(|level| level.table().eq_ignore_ascii_case(bare))
    }

    pub fn from_word(word: &str) -> Option<Level> {
        match word.trim().to_lowercase().as_str() {
            "vehicle" | "vehicles" | "truck" | "trucks" => Some(Level::Vehicle),
            "plant" | "plants" | "facility" | "facilities" => Some(Level::Plant),
            "region" | "regions" | "district" | "districts" => Some(Level::Region),
            "zone" | "zones" | "area" | "areas" => Some(Level::Zone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// FROM clause spanning a contiguous run of levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyJoin {
    pub from_clause: String,
    pub levels: Vec<Level>,
}

impl HierarchyJoin {
    pub fn tables(&self) -> Vec<&'static str> {
        self.levels.iter().map(|l| l.table()).collect()
    }

    pub fn contains(&self, level: Level) -> bool {
        self.levels.contains(&level)
    }
}

/// Inner-join chain from the leaf-most to the root-most level named
pub fn join_hierarchy(levels: &[Level]) -> HierarchyJoin {
    join_hierarchy_with(levels, JoinKind::Inner)
}

pub fn join_hierarchy_with(levels: &[Level], kind: JoinKind) -> HierarchyJoin {
    let leaf = levels.iter().copied().min().unwrap_or(Level::Vehicle);
    let root = levels.iter().copied().max().unwrap_or(leaf);

    let chain: Vec<Level> = Level::LEAF_TO_ROOT
        .into_iter()
        .filter(|l| *l >= leaf && *l <= root)
        .collect();

    let mut from_clause = format!("{} {}", leaf.table(), leaf.alias());
    for child in &chain {
        if *child == root {
            break;
        }
        if let Some((key, parent)) = child.parent_key() {
            from_clause.push_str(&format!(
                " {} {} {} ON {}.{} = {}.id_no",
                kind.keyword(),
                parent.table(),
                parent.alias(),
                child.alias(),
                key,
                parent.alias()
            ));
        }
    }

    HierarchyJoin {
        from_clause,
        levels: chain,
    }
}

/// Chain hung off another table: `anchor JOIN <leaf> ON condition ...`
pub fn join_hierarchy_onto(
    anchor: &str,
    condition: &str,
    levels: &[Level],
    kind: JoinKind,
) -> HierarchyJoin {
    let chain = join_hierarchy_with(levels, kind);
    let leaf = chain.levels.first().copied().unwrap_or(Level::Vehicle);
    let head = format!("{} {}", leaf.table(), leaf.alias());
    let rest = chain.from_clause.strip_prefix(&head).unwrap_or("");
    HierarchyJoin {
        from_clause: format!(
            "{} {} {} ON {}{}",
            anchor,
            kind.keyword(),
            head,
            condition,
            rest
        ),
        levels: chain.levels,
    }
}

/// Hierarchy levels that lie between the levels present but are missing
pub fn missing_levels<'a>(tables: impl IntoIterator<Item = &'a str>) -> Vec<Level> {
    let present: Vec<Level> = tables.into_iter().filter_map(Level::from_table).collect();
    let (Some(leaf), Some(root)) = (present.iter().min(), present.iter().max()) else {
        return Vec::new();
    };
    Level::LEAF_TO_ROOT
        .into_iter()
        .filter(|l| l > leaf && l < root && !present.contains(l))
        .collect()
}
