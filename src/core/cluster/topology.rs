// src/core/cluster/topology.rs

//! Replica-weight calculation over the label topology, used to decide how
//! much of the cluster's data a store is expected to carry.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::store::StoreInfo;

/// A placement rule, consumed as given: `count` replicas within
/// `[start_key, end_key)` spread over `location_labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRule {
    pub id: String,
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub count: u64,
    pub location_labels: Vec<String>,
}

#[derive(Debug, Default)]
struct TopoNode {
    children: HashMap<String, TopoNode>,
}

impl TopoNode {
    fn insert(&mut self, path: &[String]) {
        if let Some((head, rest)) = path.split_first() {
            self.children.entry(head.clone()).or_default().insert(rest);
        }
    }

    /// The number of branches at each depth, root children first.
    fn level_counts(&self, counts: &mut Vec<usize>, depth: usize) {
        if self.children.is_empty() {
            return;
        }
        if counts.len() <= depth {
            counts.resize(depth + 1, 0);
        }
        counts[depth] += self.children.len();
        for child in self.children.values() {
            child.level_counts(counts, depth + 1);
        }
    }
}

/// A store's label values arranged in the canonical location-label order,
/// missing labels reading as the empty string.
pub fn sorted_labels(store: &StoreInfo, location_labels: &[String]) -> Vec<(String, String)> {
    location_labels
        .iter()
        .map(|key| (key.clone(), store.label_value(key).to_string()))
        .collect()
}

/// The fraction of the candidate placement the store is expected to hold,
/// always in `(0, 1]`.
///
/// The topology of all up stores is walked level by level. If some prefix of
/// the location labels offers exactly `count` branches, each branch carries
/// `1 / count` of the data and the stores sharing this store's location split
/// it evenly. Otherwise the weight divides by the branching factor at every
/// level this store's labels can follow.
pub fn store_topo_weight(
    store: &StoreInfo,
    stores: &[Arc<StoreInfo>],
    location_labels: &[String],
    count: u64,
) -> f64 {
    if count == 0 {
        return 1.0;
    }
    if location_labels.is_empty() {
        // Flat topology: every up store is one branch.
        let up = stores.iter().filter(|s| s.is_up()).count().max(1);
        return 1.0 / up as f64;
    }

    let mut root = TopoNode::default();
    for s in stores {
        if !s.is_up() {
            continue;
        }
        let path: Vec<String> = sorted_labels(s, location_labels)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        root.insert(&path);
    }

    let mut level_counts = Vec::new();
    root.level_counts(&mut level_counts, 0);

    // The shortest label prefix on which the topology can hold `count`
    // replicas with at most one per branch.
    let mut valid_depth = location_labels.len();
    let mut is_match = false;
    for (depth, branches) in level_counts.iter().enumerate() {
        if *branches as u64 >= count {
            valid_depth = depth + 1;
            is_match = *branches as u64 == count;
            break;
        }
    }

    let store_labels = sorted_labels(store, location_labels);
    let same_location = same_location_store_count(store, stores, &store_labels[..valid_depth]);

    if is_match {
        return 1.0 / count as f64 / same_location as f64;
    }

    let mut weight = 1.0;
    let mut node = &root;
    for (depth, (_, value)) in store_labels.iter().enumerate() {
        match node.children.get(value) {
            Some(child) => {
                if depth < valid_depth && !node.children.is_empty() {
                    weight /= node.children.len() as f64;
                }
                node = child;
            }
            None => break,
        }
    }
    weight / same_location as f64
}

/// How many up stores (including `store` itself) share `store`'s values on
/// the valid label prefix.
fn same_location_store_count(
    store: &StoreInfo,
    stores: &[Arc<StoreInfo>],
    prefix: &[(String, String)],
) -> usize {
    let mut count = 1;
    for s in stores {
        if s.id() == store.id() || !s.is_up() {
            continue;
        }
        let same = prefix
            .iter()
            .all(|(key, value)| s.label_value(key) == value);
        if same {
            count += 1;
        }
    }
    count
}
