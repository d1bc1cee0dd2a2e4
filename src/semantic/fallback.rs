//! Domain-only grouping for when the embedding pipeline is unavailable.
//!
//! Tabs sharing the exact same registrable domain form a group (two or more
//! tabs), in order of each domain's first appearance. Tabs without a
//! resolvable domain are left ungrouped. Nothing here can fail.

use std::collections::{BTreeMap, HashMap};

use crate::semantic::cluster::{Clustering, Group, MIN_GROUP_SIZE};
use crate::semantic::labels::{title_case_domain, PLACEHOLDER_LABEL};
use crate::tabs::TabDescriptor;

const BUILTIN_DOMAIN_LABELS: &[(&str, &str)] = &[
    ("github.com", "💻 GitHub"),
    ("gitlab.com", "💻 GitLab"),
    ("stackoverflow.com", "💻 Stack Overflow"),
    ("developer.mozilla.org", "📚 MDN"),
    ("docs.rs", "📚 Docs.rs"),
    ("wikipedia.org", "📚 Wikipedia"),
    ("en.wikipedia.org", "📚 Wikipedia"),
    ("youtube.com", "🎬 YouTube"),
    ("twitch.tv", "🎬 Twitch"),
    ("netflix.com", "🎮 Netflix"),
    ("reddit.com", "💬 Reddit"),
    ("twitter.com", "💬 Twitter"),
    ("x.com", "💬 X"),
    ("linkedin.com", "💬 LinkedIn"),
    ("amazon.com", "🛒 Amazon"),
    ("ebay.com", "🛒 eBay"),
    ("mail.google.com", "📧 Gmail"),
    ("outlook.live.com", "📧 Outlook"),
    ("docs.google.com", "📋 Google Docs"),
    ("drive.google.com", "📋 Google Drive"),
    ("notion.so", "📋 Notion"),
    ("arxiv.org", "🔬 arXiv"),
    ("news.ycombinator.com", "📰 Hacker News"),
];

/// Domain to label lookup, built-ins plus user entries.
#[derive(Clone, Debug)]
pub struct DomainLabels {
    labels: HashMap<String, String>,
}

impl Default for DomainLabels {
    fn default() -> Self {
        let labels = BUILTIN_DOMAIN_LABELS
            .iter()
            .map(|(domain, label)| (domain.to_string(), label.to_string()))
            .collect();
        Self { labels }
    }
}

impl DomainLabels {
    /// Built-in table with `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut table = Self::default();
        for (domain, label) in overrides {
            table
                .labels
                .insert(domain.trim().to_lowercase(), label.clone());
        }
        table
    }

    pub fn label_for(&self, domain: &str) -> String {
        if let Some(label) = self.labels.get(domain) {
            return label.clone();
        }
        match title_case_domain(domain) {
            name if name.is_empty() => PLACEHOLDER_LABEL.to_string(),
            name => name,
        }
    }
}

/// Partition `tabs` by registrable domain.
pub fn group_by_domain(tabs: Vec<TabDescriptor>, labels: &DomainLabels) -> Clustering {
    let mut buckets: Vec<(String, Vec<TabDescriptor>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut ungrouped = Vec::new();

    for tab in tabs {
        let Some(domain) = tab.domain() else {
            ungrouped.push(tab);
            continue;
        };
        match index.get(&domain) {
            Some(&i) => buckets[i].1.push(tab),
            None => {
                index.insert(domain.clone(), buckets.len());
                buckets.push((domain, vec![tab]));
            }
        }
    }

    let mut groups = Vec::new();
    for (domain, members) in buckets {
        if members.len() < MIN_GROUP_SIZE {
            ungrouped.extend(members);
            continue;
        }
        let mut group = Group::new(members, Vec::new());
        group.label = labels.label_for(&domain);
        group.confidence = 1.0;
        groups.push(group);
    }

    Clustering { groups, ungrouped }
}
