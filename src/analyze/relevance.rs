// src/analyze/relevance.rs
//! Subject relevance for player/source-specific events.
//!
//! score = overlap * |subject tokens ∩ event tokens| / |subject tokens|
//!       + alias_hit (extracted entity matches an alias, fuzzy)
//!       + weapon / skin bonus
//!       + event-type bonus
//! clamped to [0, 1].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::analyze::classify::{Classification, PlayerEventKind};
use crate::ingest::types::{RawEvent, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    pub overlap: f64,
    pub alias_hit: f64,
    pub weapon: f64,
    pub skin: f64,
    pub retirement: f64,
    pub transfer: f64,
    pub benched: f64,
    /// Jaro–Winkler similarity at or above which an alias counts as matched.
    pub fuzzy_threshold: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            overlap: 0.6,
            alias_hit: 0.25,
            weapon: 0.15,
            skin: 0.15,
            retirement: 0.15,
            transfer: 0.10,
            benched: 0.08,
            fuzzy_threshold: 0.92,
        }
    }
}

impl RelevanceWeights {
    fn event_type_bonus(&self, kind: Option<PlayerEventKind>) -> f64 {
        match kind {
            Some(PlayerEventKind::Retirement) => self.retirement,
            Some(PlayerEventKind::Transfer) => self.transfer,
            Some(PlayerEventKind::Benched) => self.benched,
            Some(PlayerEventKind::Other) | None => 0.0,
        }
    }
}

static STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "and", "or", "in", "on", "to", "for", "with", "st", "stattrak",
    "souvenir", "factory", "new", "minimal", "wear", "field", "tested", "well", "worn",
    "battle", "scarred",
];

/// Lowercase alphanumeric tokens; hyphenated words are kept joined ("ak47").
pub fn tokenize(input: &str) -> BTreeSet<String> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)[\w-]+").expect("token regex"));
    RE.find_iter(input)
        .map(|m| m.as_str().replace('-', "").to_lowercase())
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn subject_tokens(subject: &Subject) -> BTreeSet<String> {
    let mut out = tokenize(&subject.name);
    for a in &subject.aliases {
        out.extend(tokenize(a));
    }
    out
}

fn alias_matches(subject: &Subject, candidates: &[String], threshold: f64) -> bool {
    let aliases: Vec<String> = subject
        .aliases
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    candidates.iter().any(|c| {
        let c = c.to_lowercase();
        aliases
            .iter()
            .any(|a| *a == c || strsim::jaro_winkler(a, &c) >= threshold)
    })
}

/// Relevance of `event` to `subject`, in [0, 1].
pub fn score_relevance(
    subject: &Subject,
    event: &RawEvent,
    classification: &Classification,
    w: &RelevanceWeights,
) -> f64 {
    let event_tokens = tokenize(&event.text());
    let subj_tokens = subject_tokens(subject);

    let mut score = 0.0;
    if !subj_tokens.is_empty() {
        let hits = subj_tokens.intersection(&event_tokens).count();
        score += w.overlap * hits as f64 / subj_tokens.len() as f64;
    }

    // Entities plus raw event tokens, so "s1mple" in free text still counts.
    let mut candidates = classification.extracted_entities.clone();
    candidates.extend(event_tokens.iter().cloned());
    if alias_matches(subject, &candidates, w.fuzzy_threshold) {
        score += w.alias_hit;
    }

    if let Some(weapon) = subject.weapon.as_deref() {
        let wt = tokenize(weapon);
        if !wt.is_empty() && wt.is_subset(&event_tokens) {
            score += w.weapon;
        }
    }
    if let Some(skin) = subject.skin.as_deref() {
        let st = tokenize(skin);
        if !st.is_empty() && st.is_subset(&event_tokens) {
            score += w.skin;
        }
    }

    score += w.event_type_bonus(classification.player_event);
    score.clamp(0.0, 1.0)
}
