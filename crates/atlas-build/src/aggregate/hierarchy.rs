//! Category hierarchy builder.
//!
//! Folds a flat table of leaf-code counts into a tree of category names
//! (chapter → super-section → section) using a code → category lookup.
//!
//! Every node's `value` is the sum of its children's values plus whatever was
//! attributed directly to it, so rows whose deeper levels are absent remain
//! counted at the deepest level they do have.

use std::collections::HashMap;

use atlas_core::labels;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::store::LookupTable;

/// A named node with an aggregated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub value: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Count attributed to this node itself rather than to a child.
    pub fn direct_value(&self) -> u64 {
        self.value
            .saturating_sub(self.children.iter().map(|c| c.value).sum::<u64>())
    }

    pub fn child(&self, name: &str) -> Option<&CategoryNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Whether every node's value covers the sum of its children.
    pub fn is_consistent(&self) -> bool {
        self.value >= self.children.iter().map(|c| c.value).sum::<u64>()
            && self.children.iter().all(CategoryNode::is_consistent)
    }
}

/// What to do when a level is missing but a deeper one is present
/// (e.g. super-section absent, section present).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Stop at the gap; the count stays with the parent.
    #[default]
    FoldIntoParent,
    /// Insert an "Unspecified" node for the gap and keep descending.
    Placeholder,
}

impl std::str::FromStr for GapPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fold" => Ok(Self::FoldIntoParent),
            "placeholder" => Ok(Self::Placeholder),
            other => Err(format!(
                "unknown gap policy '{}' (expected 'fold' or 'placeholder')",
                other
            )),
        }
    }
}

/// Options for a hierarchy build.
#[derive(Debug, Clone)]
pub struct HierarchyOptions {
    /// Label of the synthetic root.
    pub root_label: String,
    /// Leaf rows with a smaller count are discarded before folding.
    pub min_count: u64,
    pub gap_policy: GapPolicy,
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self {
            root_label: labels::DIAGNOSIS_ROOT.to_string(),
            min_count: 0,
            gap_policy: GapPolicy::default(),
        }
    }
}

/// Row accounting for a hierarchy build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    /// Leaf rows offered to the builder.
    pub rows: u64,
    /// Rows folded into the tree.
    pub kept: u64,
    /// Sum of the counts of kept rows (equals the root value).
    pub kept_count: u64,
    pub below_threshold: u64,
    pub lookup_misses: u64,
    pub missing_chapter: u64,
}

impl HierarchyStats {
    pub fn dropped(&self) -> u64 {
        self.below_threshold + self.lookup_misses + self.missing_chapter
    }
}

/// Mutable tree node used while folding rows.
#[derive(Debug, Default)]
struct NodeBuilder {
    value: u64,
    order: Vec<String>,
    children: HashMap<String, NodeBuilder>,
}

impl NodeBuilder {
    fn child_mut(&mut self, name: &str) -> &mut NodeBuilder {
        if !self.children.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.children.entry(name.to_string()).or_default()
    }

    fn finish(mut self, name: String) -> CategoryNode {
        let mut children: Vec<CategoryNode> = self
            .order
            .into_iter()
            .filter_map(|child| {
                let builder = self.children.remove(&child)?;
                Some(builder.finish(child))
            })
            .collect();
        children.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));

        CategoryNode {
            name,
            value: self.value,
            children,
        }
    }
}

/// Resolve category levels into the list of node names to increment.
///
/// Returns `None` when the chapter is missing.
pub fn resolve_path<'a>(levels: &[Option<&'a str>], policy: GapPolicy) -> Option<Vec<&'a str>> {
    let chapter = levels.first().copied().flatten()?;
    let mut path = vec![chapter];
    let mut parent = chapter;

    for (depth, level) in levels.iter().copied().enumerate().skip(1) {
        match level {
            Some(name) if name != parent => {
                path.push(name);
                parent = name;
            }
            Some(_) => break,
            None => {
                let deeper = levels[depth + 1..].iter().any(Option::is_some);
                if policy == GapPolicy::Placeholder && deeper {
                    path.push(labels::UNSPECIFIED_LEVEL);
                    parent = labels::UNSPECIFIED_LEVEL;
                } else {
                    break;
                }
            }
        }
    }

    Some(path)
}

/// Incremental hierarchy builder.
#[derive(Debug)]
pub struct HierarchyBuilder {
    options: HierarchyOptions,
    root: NodeBuilder,
    stats: HierarchyStats,
}

impl HierarchyBuilder {
    pub fn new(options: HierarchyOptions) -> Self {
        Self {
            options,
            root: NodeBuilder::default(),
            stats: HierarchyStats::default(),
        }
    }

    /// Offer one leaf row. The threshold is checked before the lookup so that
    /// rows that would be discarded anyway cost no query.
    pub fn add_row<L>(&mut self, code: &str, count: u64, lookup: &L) -> Result<()>
    where
        L: LookupTable + ?Sized,
    {
        self.stats.rows += 1;

        if count < self.options.min_count {
            self.stats.below_threshold += 1;
            return Ok(());
        }

        let Some(category) = lookup.lookup(code)? else {
            self.stats.lookup_misses += 1;
            tracing::debug!(code, "no category for code");
            return Ok(());
        };

        if !self.add_levels(&category.levels(), count) {
            self.stats.missing_chapter += 1;
            tracing::debug!(code, "category row has no chapter");
        }
        Ok(())
    }

    /// Fold a count along already-resolved category levels. Returns `false`
    /// (and adds nothing) when the chapter is missing.
    pub fn add_levels(&mut self, levels: &[Option<&str>], count: u64) -> bool {
        let Some(path) = resolve_path(levels, self.options.gap_policy) else {
            return false;
        };

        self.root.value += count;
        let mut node = &mut self.root;
        for name in path {
            node = node.child_mut(name);
            node.value += count;
        }

        self.stats.kept += 1;
        self.stats.kept_count += count;
        true
    }

    /// Finish the tree. Children at every level are ordered by value
    /// descending, then name.
    pub fn finish(self) -> (CategoryNode, HierarchyStats) {
        let root = self.root.finish(self.options.root_label);
        (root, self.stats)
    }
}

/// Build a hierarchy from `(code, count)` rows.
pub fn build_hierarchy<I, S, L>(
    rows: I,
    lookup: &L,
    options: HierarchyOptions,
) -> Result<(CategoryNode, HierarchyStats)>
where
    I: IntoIterator<Item = (S, u64)>,
    S: AsRef<str>,
    L: LookupTable + ?Sized,
{
    let mut builder = HierarchyBuilder::new(options);
    for (code, count) in rows {
        builder.add_row(code.as_ref(), count, lookup)?;
    }

    let (root, stats) = builder.finish();
    tracing::info!(
        rows = stats.rows,
        kept = stats.kept,
        below_threshold = stats.below_threshold,
        lookup_misses = stats.lookup_misses,
        missing_chapter = stats.missing_chapter,
        "hierarchy built"
    );
    Ok((root, stats))
}
