//! Frequency tables over categorical keys.
//!
//! A [`FrequencyTable`] remembers the order in which keys were first seen so
//! that sorting by count is deterministic: ties keep encounter order.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use atlas_core::RawRecord;

use crate::Result;
use crate::store::{RecordStore, ScanQuery, ScanStats, scan_records};

/// Counts per key, in first-seen order.
#[derive(Debug, Clone)]
pub struct FrequencyTable<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, u64)>,
}

impl<K> Default for FrequencyTable<K> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> FrequencyTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of a key.
    pub fn increment(&mut self, key: K) {
        self.add(key, 1);
    }

    /// Count `count` occurrences of a key.
    pub fn add(&mut self, key: K, count: u64) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += count,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, count));
            }
        }
    }

    pub fn get(&self, key: &K) -> u64 {
        self.index.get(key).map_or(0, |&i| self.entries[i].1)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.entries.iter().map(|(k, c)| (k, *c))
    }

    /// Entries by count descending; equal counts keep first-seen order.
    pub fn into_sorted(self) -> Vec<(K, u64)> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    /// Entries in first-seen order.
    pub fn into_entries(self) -> Vec<(K, u64)> {
        self.entries
    }
}

impl<K: Eq + Hash + Clone> FromIterator<K> for FrequencyTable<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut table = Self::new();
        for key in iter {
            table.increment(key);
        }
        table
    }
}

/// One outer group of a two-level frequency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedCounts<O, I> {
    pub key: O,
    /// Sum of the inner counts.
    pub total: u64,
    /// Inner keys by count descending, ties in first-seen order.
    pub items: Vec<(I, u64)>,
}

/// Regroup a table keyed by `(outer, inner)` into outer groups.
///
/// Outer groups come back in ascending key order.
pub fn nest<O, I>(table: FrequencyTable<(O, I)>) -> Vec<NestedCounts<O, I>>
where
    O: Ord + Eq + Hash + Clone,
    I: Eq + Hash + Clone,
{
    let mut groups: BTreeMap<O, Vec<(I, u64)>> = BTreeMap::new();
    for ((outer, inner), count) in table.into_entries() {
        groups.entry(outer).or_default().push((inner, count));
    }

    groups
        .into_iter()
        .map(|(key, mut items)| {
            items.sort_by(|a, b| b.1.cmp(&a.1));
            NestedCounts {
                key,
                total: items.iter().map(|(_, c)| c).sum(),
                items,
            }
        })
        .collect()
}

/// Counters from a counting scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountStats {
    pub scan: ScanStats,
    /// Valid records rejected by the key function.
    pub filtered: u64,
    /// Records that contributed to the table.
    pub counted: u64,
}

/// Scan a record stream and count the key each record maps to.
///
/// Records for which `key_fn` returns `None` are filtered out. The table's
/// total always equals `stats.counted`.
pub fn count_by<S, R, K, F>(
    store: &S,
    query: &ScanQuery,
    mut key_fn: F,
) -> Result<(FrequencyTable<K>, CountStats)>
where
    S: RecordStore,
    R: RawRecord,
    K: Eq + Hash + Clone,
    F: FnMut(&R) -> Option<K>,
{
    let mut table = FrequencyTable::new();
    let mut filtered = 0u64;
    let mut counted = 0u64;

    let scan = scan_records::<S, R, _>(store, query, |record| {
        match key_fn(&record) {
            Some(key) => {
                table.increment(key);
                counted += 1;
            }
            None => filtered += 1,
        }
        Ok(true)
    })?;

    Ok((
        table,
        CountStats {
            scan,
            filtered,
            counted,
        },
    ))
}
