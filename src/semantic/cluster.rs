//! Greedy similarity clustering of tabs.
//!
//! Single pass over the items in their original order. The first
//! unassigned item seeds a group; every later unassigned item joins when
//! its mean cosine similarity against *all* current members exceeds the
//! threshold. Groups of one are reported as ungrouped.
//!
//! The result depends on input order and is not globally optimal: earlier
//! groups are never revisited.

use serde::Serialize;

use crate::semantic::embeddings::{l2_norm, Embedding};
use crate::tabs::TabDescriptor;

/// Smallest number of tabs that forms a group.
pub const MIN_GROUP_SIZE: usize = 2;

/// A set of similar tabs.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub label: String,
    pub tabs: Vec<TabDescriptor>,
    /// Cohesion of the group in `[0, 1]`.
    pub confidence: f32,
    /// Parallel to `tabs`
    #[serde(skip)]
    pub embeddings: Vec<Embedding>,
}

impl Group {
    /// An unlabelled group; `labels::annotate` fills in label and confidence.
    pub fn new(tabs: Vec<TabDescriptor>, embeddings: Vec<Embedding>) -> Self {
        Self {
            label: String::new(),
            tabs,
            confidence: 0.0,
            embeddings,
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

/// Output of a clustering run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Clustering {
    pub groups: Vec<Group>,
    pub ungrouped: Vec<TabDescriptor>,
}

impl Clustering {
    /// Number of tabs placed in a group.
    pub fn grouped_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }
}

/// Index-level partition produced by [`partition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub groups: Vec<Vec<usize>>,
    pub ungrouped: Vec<usize>,
}

/// `dot(a, b) / (|a| * |b|)`, or 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

fn mean_similarity(candidate: &[f32], members: &[usize], embeddings: &[Embedding]) -> f32 {
    let total: f32 = members
        .iter()
        .map(|&member| cosine_similarity(candidate, &embeddings[member]))
        .sum();
    total / members.len() as f32
}

/// Partition embedding indices into groups.
pub fn partition(embeddings: &[Embedding], threshold: f32) -> Partition {
    let mut assigned = vec![false; embeddings.len()];
    let mut result = Partition::default();

    for seed in 0..embeddings.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![seed];

        for candidate in (seed + 1)..embeddings.len() {
            if assigned[candidate] {
                continue;
            }
            if mean_similarity(&embeddings[candidate], &members, embeddings) > threshold {
                assigned[candidate] = true;
                members.push(candidate);
            }
        }

        if members.len() >= MIN_GROUP_SIZE {
            result.groups.push(members);
        } else {
            result.ungrouped.push(seed);
        }
    }

    result
}

/// Cluster `(tab, embedding)` pairs by similarity.
pub fn cluster(items: Vec<(TabDescriptor, Embedding)>, threshold: f32) -> Clustering {
    let (tabs, embeddings): (Vec<TabDescriptor>, Vec<Embedding>) = items.into_iter().unzip();
    let partition = partition(&embeddings, threshold);

    let groups = partition
        .groups
        .iter()
        .map(|members| {
            Group::new(
                members.iter().map(|&i| tabs[i].clone()).collect(),
                members.iter().map(|&i| embeddings[i].clone()).collect(),
            )
        })
        .collect();

    let ungrouped = partition.ungrouped.iter().map(|&i| tabs[i].clone()).collect();

    Clustering { groups, ungrouped }
}
