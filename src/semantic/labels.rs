//! Group labels and cohesion scores.

use std::collections::HashMap;

use crate::semantic::cluster::{cosine_similarity, Group};
use crate::semantic::embeddings::Embedding;
use crate::tabs::TabDescriptor;

/// Label used when neither a category nor a domain can be derived.
pub const PLACEHOLDER_LABEL: &str = "📁 Group";

pub struct Category {
    pub name: &'static str,
    pub icon: &'static str,
    pub keywords: &'static [&'static str],
}

impl Category {
    pub fn label(&self) -> String {
        format!("{} {}", self.icon, self.name)
    }

    /// Total keyword occurrences in an already lowercased corpus.
    fn score(&self, corpus: &str) -> usize {
        self.keywords
            .iter()
            .map(|keyword| corpus.matches(keyword).count())
            .sum()
    }
}

/// Category taxonomy. Order matters: earlier entries win ties.
pub static TAXONOMY: &[Category] = &[
    Category {
        name: "Development",
        icon: "💻",
        keywords: &[
            "github", "gitlab", "stackoverflow", "code", "programming", "developer", "api",
            "react", "vue", "angular", "javascript", "typescript", "python", "rust", "npm",
            "docker", "git", "compiler", "debug",
        ],
    },
    Category {
        name: "Documentation",
        icon: "📚",
        keywords: &[
            "docs", "documentation", "guide", "tutorial", "reference", "manual", "wiki",
            "readme", "learn",
        ],
    },
    Category {
        name: "Social",
        icon: "💬",
        keywords: &[
            "twitter", "facebook", "instagram", "linkedin", "reddit", "mastodon", "discord",
            "tiktok", "social",
        ],
    },
    Category {
        name: "Video",
        icon: "🎬",
        keywords: &["youtube", "vimeo", "twitch", "video", "watch", "stream"],
    },
    Category {
        name: "Shopping",
        icon: "🛒",
        keywords: &[
            "amazon", "ebay", "shop", "buy", "cart", "price", "deal", "store", "etsy",
            "checkout",
        ],
    },
    Category {
        name: "News",
        icon: "📰",
        keywords: &[
            "news", "bbc", "cnn", "nytimes", "guardian", "reuters", "headline", "breaking",
        ],
    },
    Category {
        name: "Email",
        icon: "📧",
        keywords: &["gmail", "outlook", "mail", "inbox", "proton"],
    },
    Category {
        name: "Productivity",
        icon: "📋",
        keywords: &[
            "notion", "trello", "asana", "jira", "calendar", "slack", "todo", "drive", "sheets",
        ],
    },
    Category {
        name: "Research",
        icon: "🔬",
        keywords: &["arxiv", "scholar", "paper", "research", "journal", "study", "pubmed"],
    },
    Category {
        name: "Entertainment",
        icon: "🎮",
        keywords: &["netflix", "spotify", "game", "music", "movie", "hulu", "steam"],
    },
    Category {
        name: "Finance",
        icon: "💰",
        keywords: &["bank", "finance", "stock", "crypto", "invest", "paypal", "trading"],
    },
    Category {
        name: "Travel",
        icon: "✈️",
        keywords: &["booking", "airbnb", "flight", "hotel", "travel", "expedia", "trip"],
    },
];

/// Lowercased titles plus each distinct domain once.
fn corpus(tabs: &[TabDescriptor]) -> String {
    let mut parts: Vec<String> = tabs.iter().map(|tab| tab.title.to_lowercase()).collect();

    let mut domains: Vec<String> = Vec::new();
    for domain in tabs.iter().filter_map(TabDescriptor::domain) {
        if !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    parts.extend(domains);

    parts.join(" ")
}

/// Highest-scoring category, if any keyword matched.
pub fn best_category(tabs: &[TabDescriptor]) -> Option<&'static Category> {
    let corpus = corpus(tabs);

    let mut best: Option<(&'static Category, usize)> = None;
    for category in TAXONOMY {
        let score = category.score(&corpus);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((category, score)),
        }
    }

    best.map(|(category, _)| category)
}

/// Most frequent domain among `tabs`; ties go to the first seen.
pub fn most_common_domain(tabs: &[TabDescriptor]) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for domain in tabs.iter().filter_map(TabDescriptor::domain) {
        let count = counts.entry(domain.clone()).or_insert(0);
        if *count == 0 {
            order.push(domain);
        }
        *count += 1;
    }

    let mut best: Option<(&String, usize)> = None;
    for domain in &order {
        let count = counts[domain];
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((domain, count));
        }
    }

    best.map(|(domain, _)| domain.clone())
}

/// `"docs.google.com"` -> `"Docs Google"`.
pub fn title_case_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|s| !s.is_empty()).collect();
    let significant = match labels.len() {
        0 => return String::new(),
        1 => &labels[..],
        n => &labels[..n - 1],
    };

    significant
        .iter()
        .flat_map(|label| label.split('-'))
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human-readable label for a set of tabs.
pub fn generate_label(tabs: &[TabDescriptor]) -> String {
    if let Some(category) = best_category(tabs) {
        return category.label();
    }

    match most_common_domain(tabs).map(|domain| title_case_domain(&domain)) {
        Some(name) if !name.is_empty() => name,
        _ => PLACEHOLDER_LABEL.to_string(),
    }
}

/// Mean pairwise cosine similarity, clamped to `[0, 1]`.
///
/// Groups of fewer than two members have cohesion 1.0.
pub fn cohesion(embeddings: &[Embedding]) -> f32 {
    let k = embeddings.len();
    if k < 2 {
        return 1.0;
    }

    let mut total = 0.0f32;
    for i in 0..k {
        for j in (i + 1)..k {
            total += cosine_similarity(&embeddings[i], &embeddings[j]);
        }
    }
    let pairs = (k * (k - 1) / 2) as f32;

    (total / pairs).clamp(0.0, 1.0)
}

/// Fill in label and confidence of a freshly clustered group.
pub fn annotate(group: &mut Group) {
    group.label = generate_label(&group.tabs);
    group.confidence = cohesion(&group.embeddings);
}
