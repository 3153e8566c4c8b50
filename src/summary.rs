// Short per-event summaries for the details panel, plus the cache that backs
// "Generate" / "Regenerate". Summaries produced elsewhere can be cleaned with
// `clean_summary` before being cached.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feed::iso_timestamp;
use crate::types::{EventId, SeismicEvent};

pub const MAX_SUMMARY_CHARS: usize = 320;

/// Deep events above this depth (km) are felt less strongly.
const SHALLOW_LIMIT_KM: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryInput {
    pub id: EventId,
    pub magnitude: f64,
    pub depth_km: f64,
    pub place: String,
    pub time_iso: String,
}

impl From<&SeismicEvent> for SummaryInput {
    fn from(event: &SeismicEvent) -> Self {
        SummaryInput {
            id: event.id.clone(),
            magnitude: event.magnitude,
            depth_km: event.depth_km(),
            place: event.place.clone(),
            time_iso: format!("{}Z", iso_timestamp(event.time)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShakingIntensity {
    Weak,
    Light,
    Moderate,
    Strong,
}

impl ShakingIntensity {
    pub fn estimate(magnitude: f64, depth_km: f64) -> Self {
        if magnitude >= 6.0 {
            ShakingIntensity::Strong
        } else if magnitude >= 5.0 {
            if depth_km <= SHALLOW_LIMIT_KM {
                ShakingIntensity::Moderate
            } else {
                ShakingIntensity::Light
            }
        } else if magnitude < 3.5 {
            ShakingIntensity::Weak
        } else {
            ShakingIntensity::Light
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            ShakingIntensity::Weak => "weak",
            ShakingIntensity::Light => "light",
            ShakingIntensity::Moderate => "moderate",
            ShakingIntensity::Strong => "strong",
        }
    }

    pub fn needs_safety_note(&self) -> bool {
        matches!(self, ShakingIntensity::Moderate | ShakingIntensity::Strong)
    }
}

/// Deterministic summary built from the event fields alone.
pub fn local_summary(input: &SummaryInput) -> String {
    let intensity = ShakingIntensity::estimate(input.magnitude, input.depth_km);
    let mut text = format!(
        "M{:.1} near {} at {}. Depth {:.1} km; likely {} shaking.",
        input.magnitude,
        input.place,
        input.time_iso,
        input.depth_km,
        intensity.word()
    );
    if intensity.needs_safety_note() {
        text.push_str(" If nearby, secure loose items and avoid damaged structures.");
    }
    truncate_chars(text, MAX_SUMMARY_CHARS)
}

/// Normalize externally generated text: accepts `{"summary": "..."}` or plain prose,
/// strips a leading "Analysis:" label and backticks, keeps at most two sentences.
pub fn clean_summary(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = summary_field(trimmed)
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            (end > start).then(|| summary_field(&trimmed[start..=end])).flatten()
        })
        .unwrap_or_else(|| trimmed.to_string());

    let mut text = body.replace('`', "");
    let lower = text.to_ascii_lowercase();
    for label in ["analysis", "explanation"] {
        if lower.trim_start().starts_with(label) {
            let skip = text.len() - text.trim_start().len() + label.len();
            text = text[skip..].trim_start_matches([':', ' ']).to_string();
            break;
        }
    }
    truncate_chars(first_sentences(&text, 2), MAX_SUMMARY_CHARS)
}

fn summary_field(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value.get("summary")?.as_str().map(str::to_string)
}

fn first_sentences(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = String::new();
    let mut sentences = 0;
    for word in words {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        if word.ends_with(['.', '!', '?']) {
            sentences += 1;
            if sentences == limit {
                break;
            }
        }
    }
    out
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Bounded id -> summary cache. Oldest insertion is evicted first.
#[derive(Debug, Clone)]
pub struct SummaryCache {
    capacity: usize,
    entries: HashMap<EventId, String>,
    order: VecDeque<EventId>,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        SummaryCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &EventId) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn insert(&mut self, id: EventId, summary: String) {
        if self.entries.insert(id.clone(), summary).is_some() {
            self.order.retain(|existing| existing != &id);
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                debug!(id = %evicted, "summary evicted");
                self.entries.remove(&evicted);
            }
        }
    }

    /// Cached summary, or a fresh local one (which is then cached).
    pub fn get_or_summarize(&mut self, event: &SeismicEvent) -> String {
        if let Some(text) = self.get(&event.id) {
            return text.to_string();
        }
        let text = local_summary(&SummaryInput::from(event));
        self.insert(event.id.clone(), text.clone());
        text
    }

    /// Drop one entry so the next request regenerates it.
    pub fn invalidate(&mut self, id: &EventId) -> bool {
        if self.entries.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
