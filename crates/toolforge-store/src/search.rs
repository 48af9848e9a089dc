//! Multi-signal lexical search over the tool catalog.
//!
//! A query is normalized (lowercased, punctuation stripped, tokenized) and
//! scored against every candidate tool through a set of independent signals
//! combined as a weighted sum, plus a capped popularity boost. Weights, the
//! score threshold, and the synonym table are all configuration so relevance
//! can be tuned offline without interface changes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::tool::Tool;

/// Relative weight of each scoring signal.
#[derive(Debug, Clone)]
pub struct SearchWeights {
    /// Query equals the tool name after normalization.
    pub exact_name: f64,
    /// Query is a substring of the name, or vice versa.
    pub name_substring: f64,
    /// Jaccard similarity between query tokens and name+description+tags tokens.
    pub token_jaccard: f64,
    /// Longest-common-subsequence ratio between query and name.
    pub fuzzy_name: f64,
    /// Any query token appears as a substring of the description.
    pub description_hit: f64,
    /// Fraction of query tokens present in the tag set.
    pub tag_hit: f64,
    /// Any query token equals the category.
    pub category_hit: f64,
    /// Token Jaccard recomputed with the synonym-expanded query.
    pub synonym_expansion: f64,
    /// Cap on the log-scaled execution-count boost.
    pub popularity: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            exact_name: 0.35,
            name_substring: 0.15,
            token_jaccard: 0.20,
            fuzzy_name: 0.10,
            description_hit: 0.08,
            tag_hit: 0.07,
            category_hit: 0.03,
            synonym_expansion: 0.02,
            popularity: 0.05,
        }
    }
}

/// Search engine configuration: weights, default cutoff, synonym table.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub weights: SearchWeights,
    /// Default minimum combined score for a result to be returned.
    pub threshold: f64,
    /// Token → alternates, applied symmetrically when expanding a query.
    pub synonyms: HashMap<String, Vec<String>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            weights: SearchWeights::default(),
            threshold: 0.3,
            synonyms: default_synonyms(),
        }
    }
}

/// The built-in synonym table. Keys and alternates are single lowercase
/// tokens.
pub fn default_synonyms() -> HashMap<String, Vec<String>> {
    let entries: &[(&str, &[&str])] = &[
        ("calculate", &["compute", "find", "determine", "get"]),
        ("convert", &["transform", "change", "translate"]),
        ("factorial", &["fact", "permutation"]),
        ("temperature", &["temp", "fahrenheit", "celsius", "kelvin"]),
        ("count", &["number", "quantity", "amount"]),
        ("character", &["char", "letter", "symbol"]),
        ("string", &["text", "word"]),
        ("add", &["sum", "plus", "addition"]),
        ("subtract", &["minus", "difference"]),
        ("multiply", &["times", "product"]),
        ("divide", &["division", "quotient"]),
    ];
    entries
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

/// Per-signal score contributions, exposed for offline weight tuning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreBreakdown {
    pub exact_name: f64,
    pub name_substring: f64,
    pub token_jaccard: f64,
    pub fuzzy_name: f64,
    pub description_hit: f64,
    pub tag_hit: f64,
    pub category_hit: f64,
    pub synonym_expansion: f64,
    pub popularity: f64,
}

/// A scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub tool: Tool,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score `candidates` against `query` and return at most `limit` hits at or
/// above `threshold`, best first. Ties break by higher execution count,
/// then by most recently updated.
pub fn rank(
    query: &str,
    candidates: &[Tool],
    config: &SearchConfig,
    threshold: f64,
    limit: usize,
) -> Vec<SearchHit> {
    let normalized = normalize(query);
    let query_tokens = tokenize(&normalized);
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let expanded_tokens = expand(&query_tokens, &config.synonyms);

    let mut hits: Vec<SearchHit> = candidates
        .iter()
        .map(|tool| score_tool(&normalized, &query_tokens, &expanded_tokens, tool, &config.weights))
        .filter(|hit| hit.score >= threshold)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.tool.execution_count.cmp(&a.tool.execution_count))
            .then_with(|| b.tool.updated_at.cmp(&a.tool.updated_at))
    });
    hits.truncate(limit);
    hits
}

/// Score a single tool against an already-normalized query.
fn score_tool(
    query: &str,
    query_tokens: &HashSet<String>,
    expanded_tokens: &HashSet<String>,
    tool: &Tool,
    weights: &SearchWeights,
) -> SearchHit {
    let name = normalize(&tool.name);
    let description = tool.description.to_lowercase();
    let tags: HashSet<String> = tool.tags.iter().map(|t| normalize(t)).collect();
    let category = tool.category.as_deref().map(normalize).unwrap_or_default();

    // Token pool covering name, description, and tags.
    let mut tool_tokens = tokenize(&name);
    tool_tokens.extend(tokenize(&normalize(&tool.description)));
    for tag in &tags {
        tool_tokens.extend(tokenize(tag));
    }

    let mut b = ScoreBreakdown::default();

    if query == name {
        b.exact_name = weights.exact_name;
    }
    if !query.is_empty() && !name.is_empty() && (name.contains(query) || query.contains(&name)) {
        b.name_substring = weights.name_substring;
    }
    b.token_jaccard = weights.token_jaccard * jaccard(query_tokens, &tool_tokens);
    b.fuzzy_name = weights.fuzzy_name * lcs_ratio(query, &name);
    if query_tokens.iter().any(|t| description.contains(t.as_str())) {
        b.description_hit = weights.description_hit;
    }
    if !query_tokens.is_empty() {
        let tag_matches = query_tokens.iter().filter(|t| tags.contains(*t)).count();
        b.tag_hit = weights.tag_hit * tag_matches as f64 / query_tokens.len() as f64;
    }
    if !category.is_empty() && query_tokens.contains(&category) {
        b.category_hit = weights.category_hit;
    }
    b.synonym_expansion = weights.synonym_expansion * jaccard(expanded_tokens, &tool_tokens);

    // Popularity: log-scaled execution count, saturating at 100 runs.
    let popularity = (1.0 + tool.execution_count.max(0) as f64).ln() / 101f64.ln();
    b.popularity = weights.popularity * popularity.min(1.0);

    let score = b.exact_name
        + b.name_substring
        + b.token_jaccard
        + b.fuzzy_name
        + b.description_hit
        + b.tag_hit
        + b.category_hit
        + b.synonym_expansion
        + b.popularity;

    SearchHit {
        tool: tool.clone(),
        score,
        breakdown: b,
    }
}

// ── text primitives ──────────────────────────────────────────────────

/// Lowercase, strip punctuation to spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        let c = if c.is_alphanumeric() || c == '_' {
            c.to_ascii_lowercase()
        } else {
            ' '
        };
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    // Underscores separate words in tool names (snake_case).
    let out = out.replace('_', " ");
    out.trim().to_string()
}

/// Split normalized text into its token set.
pub fn tokenize(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Expand a token set through the synonym table: a token matching a key or
/// any of its alternates pulls in the key and all alternates.
fn expand(tokens: &HashSet<String>, synonyms: &HashMap<String, Vec<String>>) -> HashSet<String> {
    let mut expanded = tokens.clone();
    for token in tokens {
        for (key, alternates) in synonyms {
            if token == key || alternates.contains(token) {
                expanded.insert(key.clone());
                expanded.extend(alternates.iter().cloned());
            }
        }
    }
    expanded
}

/// Jaccard similarity of two token sets.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Longest-common-subsequence ratio: `2·LCS(a,b) / (|a| + |b|)`.
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Two-row DP keeps memory linear in the shorter string.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

// ── tests ────────────────────────────────────────────────────────────
