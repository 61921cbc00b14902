//! Topic evolution scoring.
//!
//! Pure and reproducible: identical inputs with the same injected `now`
//! always produce the same ranked list, which is what the tests rely on.

use chrono::{DateTime, Utc};

use crate::schema::{MAX_TOPICS, Topic, normalize_topic};

/// Weight on relative usage frequency in the composite score.
const FREQUENCY_WEIGHT: f64 = 0.4;
/// Weight on recency decay in the composite score.
const RECENCY_WEIGHT: f64 = 0.6;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Fold a batch of raw topic names into an existing topic list and return the
/// re-ranked, capped result.
///
/// Matching is trimmed and case-insensitive; a matched topic gets its count
/// bumped and `last_used` stamped, an unmatched name is appended with count 1
/// (keeping the caller's casing for display).  Empty names are discarded.
pub fn evolve_topics(current: &[Topic], raw_names: &[String], now: DateTime<Utc>) -> Vec<Topic> {
    let mut topics = current.to_vec();

    for raw in raw_names {
        let normalized = normalize_topic(raw);
        if normalized.is_empty() {
            continue;
        }
        match topics.iter_mut().find(|t| normalize_topic(&t.name) == normalized) {
            Some(topic) => {
                topic.count = topic.count.saturating_add(1);
                topic.last_used = now;
            }
            None => topics.push(Topic {
                name: raw.trim().to_string(),
                count: 1,
                last_used: now,
            }),
        }
    }

    rank_topics(topics, now)
}

/// Sort descending by composite score (stable, so ties keep input order) and
/// truncate to [`MAX_TOPICS`].
pub fn rank_topics(topics: Vec<Topic>, now: DateTime<Utc>) -> Vec<Topic> {
    let Some(max_count) = topics.iter().map(|t| t.count).max() else {
        return topics;
    };
    let max_count = f64::from(max_count.max(1));

    let mut scored: Vec<(f64, Topic)> = topics
        .into_iter()
        .map(|t| (composite_score(&t, max_count, now), t))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranked: Vec<Topic> = scored.into_iter().map(|(_, t)| t).collect();
    ranked.truncate(MAX_TOPICS);
    ranked
}

/// `0.4 × count/max_count + 0.6 × 1/(1 + days_since_last_used)`.
fn composite_score(topic: &Topic, max_count: f64, now: DateTime<Utc>) -> f64 {
    let frequency = f64::from(topic.count) / max_count;
    let elapsed = (now - topic.last_used).num_seconds().max(0) as f64;
    let recency = 1.0 / (1.0 + elapsed / SECONDS_PER_DAY);
    FREQUENCY_WEIGHT * frequency + RECENCY_WEIGHT * recency
}
