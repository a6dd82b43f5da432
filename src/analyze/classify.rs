//! Event classifier: free text + tags → category, severity, player event kind.
//!
//! Rules are checked in a fixed priority order and the first matching
//! category wins:
//! economy > gameplay/map > competitive/ranking > anti-cheat > misc.
//! Severity is looked up from a [`SeverityTable`], not branched on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ingest::types::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Economy,
    Gameplay,
    Competitive,
    AntiCheat,
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Kind of a roster/career event; `None` for non-player text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEventKind {
    Retirement,
    Transfer,
    Benched,
    Other,
}

/// Tunable category → severity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityTable {
    pub economy: Severity,
    pub gameplay: Severity,
    pub competitive: Severity,
    pub anti_cheat: Severity,
    pub misc: Severity,
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            economy: Severity::High,
            gameplay: Severity::Medium,
            competitive: Severity::Medium,
            anti_cheat: Severity::Medium,
            misc: Severity::Low,
        }
    }
}

impl SeverityTable {
    pub fn severity_for(&self, category: Category) -> Severity {
        match category {
            Category::Economy => self.economy,
            Category::Gameplay => self.gameplay,
            Category::Competitive => self.competitive,
            Category::AntiCheat => self.anti_cheat,
            Category::Misc => self.misc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub severity: Severity,
    pub player_event: Option<PlayerEventKind>,
    pub extracted_entities: Vec<String>,
}

/// A raw event with its (recomputed, never persisted) classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub event: RawEvent,
    pub classification: Classification,
}

struct CategoryRule {
    category: Category,
    re: Regex,
}

static CATEGORY_RULES: Lazy<Vec<CategoryRule>> = Lazy::new(|| {
    let rules: [(Category, &str); 4] = [
        (
            Category::Economy,
            r"(?i)\b(economy|trade|trading|trade[- ]?hold|market(place)?|cases?|capsules?|drops?|collections?|souvenirs?|armory|operation|supply|rarity|skins?|stickers?|charms?|float|prices?|marketplace)\b",
        ),
        (
            Category::Gameplay,
            r"(?i)\b(maps?|mirage|inferno|nuke|ancient|anubis|dust ?(2|ii)|vertigo|overpass|train|weapons?|recoil|damage|spray|nerf(ed)?|buff(ed)?|movement|smokes?|molotov|grenades?|awp|ak-?47|m4a1(-s)?|m4a4|deagle|desert eagle|usp-?s|glock)\b",
        ),
        (
            Category::Competitive,
            r"(?i)\b(premier|rank(s|ed|ing)?|matchmaking|elo|rating|majors?|tournament|roster|retires?|retire(d|ment)|bench(ed)?|transfer(red)?|signs?|signed|signing|lineup|coach|team)\b",
        ),
        (
            Category::AntiCheat,
            r"(?i)\b(vac|anti-?cheat|cheat(s|er|ers|ing)?|bans?|banned|overwatch|exploits?)\b",
        ),
    ];
    rules
        .into_iter()
        .map(|(category, pat)| CategoryRule {
            category,
            re: Regex::new(pat).expect("category regex"),
        })
        .collect()
});

static RE_RETIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(retires?|retired|retirement|steps? down|hangs? up)\b").expect("retire regex")
});
static RE_BENCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(bench(ed)?|inactive|steps? back|stand-?in)\b").expect("bench regex")
});
static RE_TRANSFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(transfer(red|s)?|joins?|joined|signs?|signed|departs?|leaves|moves? to|parts? ways)\b")
        .expect("transfer regex")
});

static WEAPONS: &[(&str, &str)] = &[
    ("AK-47", r"(?i)\bak-?47\b"),
    ("AWP", r"(?i)\bawp\b"),
    ("M4A4", r"(?i)\bm4a4\b"),
    ("M4A1-S", r"(?i)\bm4a1(-s)?\b"),
    ("Desert Eagle", r"(?i)\b(deagle|desert eagle)\b"),
    ("USP-S", r"(?i)\busp(-s)?\b"),
    ("Glock-18", r"(?i)\bglock(-18)?\b"),
    ("Knife", r"(?i)\b(knife|knives)\b"),
    ("Gloves", r"(?i)\bgloves\b"),
];

static MAPS: &[&str] = &[
    "Mirage", "Inferno", "Nuke", "Ancient", "Anubis", "Dust2", "Vertigo", "Overpass", "Train",
];

static ENTITY_RES: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    let mut out: Vec<(String, Regex)> = WEAPONS
        .iter()
        .map(|(name, pat)| (name.to_string(), Regex::new(pat).expect("weapon regex")))
        .collect();
    for m in MAPS {
        let pat = if *m == "Dust2" {
            r"(?i)\bdust ?(2|ii)\b".to_string()
        } else {
            format!(r"(?i)\b{}\b", m.to_ascii_lowercase())
        };
        out.push((m.to_string(), Regex::new(&pat).expect("map regex")));
    }
    out
});

fn match_text(title: &str, body: &str, tags: &BTreeSet<String>) -> String {
    let mut text = String::with_capacity(title.len() + body.len() + 32);
    text.push_str(title);
    text.push(' ');
    text.push_str(body);
    for t in tags {
        text.push(' ');
        // "type:retirement" → "type retirement"
        text.push_str(&t.replace([':', '_'], " "));
    }
    text
}

/// Pure classification of an event's text and tags.
pub fn classify(
    title: &str,
    body: &str,
    tags: &BTreeSet<String>,
    table: &SeverityTable,
) -> Classification {
    let text = match_text(title, body, tags);

    let category = CATEGORY_RULES
        .iter()
        .find(|r| r.re.is_match(&text))
        .map(|r| r.category)
        .unwrap_or(Category::Misc);

    Classification {
        category,
        severity: table.severity_for(category),
        player_event: detect_player_event(&text, tags),
        extracted_entities: extract_entities(&text, tags),
    }
}

pub fn classify_event(event: &RawEvent, table: &SeverityTable) -> ClassifiedEvent {
    ClassifiedEvent {
        classification: classify(&event.title, &event.body, &event.tags, table),
        event: event.clone(),
    }
}

/// Retirement beats benching beats transfer when several match.
fn detect_player_event(text: &str, tags: &BTreeSet<String>) -> Option<PlayerEventKind> {
    let is_player_text = tags.iter().any(|t| t.starts_with("player:"))
        || RE_RETIRE.is_match(text)
        || RE_BENCH.is_match(text)
        || RE_TRANSFER.is_match(text);
    if !is_player_text {
        return None;
    }
    Some(if RE_RETIRE.is_match(text) {
        PlayerEventKind::Retirement
    } else if RE_BENCH.is_match(text) {
        PlayerEventKind::Benched
    } else if RE_TRANSFER.is_match(text) {
        PlayerEventKind::Transfer
    } else {
        PlayerEventKind::Other
    })
}

/// Weapons, maps, and `player:`/`team:` handles, sorted and deduplicated.
fn extract_entities(text: &str, tags: &BTreeSet<String>) -> Vec<String> {
    let mut out: BTreeSet<String> = ENTITY_RES
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(name, _)| name.clone())
        .collect();
    for t in tags {
        if let Some(h) = t.strip_prefix("player:").or_else(|| t.strip_prefix("team:")) {
            if !h.is_empty() {
                out.insert(h.to_string());
            }
        }
    }
    out.into_iter().collect()
}
