use crate::error::{SchedError, SchedResult};
use crate::store::Store;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub student_id: String,
    pub rank: u32,
    pub score: i64,
}

/// Standings at one point in time. Immutable once built; the previous
/// snapshot is passed back in by the caller to compute movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshot {
    pub taken_at: NaiveDateTime,
    pub entries: Vec<RankEntry>,
}

impl RankingSnapshot {
    /// Ranks by score descending; equal scores keep their input order.
    pub fn from_scores<I>(scores: I, taken_at: NaiveDateTime) -> Self
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let mut scored: Vec<(String, i64)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        let entries = scored
            .into_iter()
            .enumerate()
            .map(|(i, (student_id, score))| RankEntry {
                student_id,
                rank: i as u32 + 1,
                score,
            })
            .collect();
        Self { taken_at, entries }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Movement {
    Up,
    Down,
    Same,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankChange {
    pub student_id: String,
    pub rank: u32,
    pub score: i64,
    pub moved: Movement,
    pub delta_score: i64,
    /// Set only when rank or score changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_until: Option<NaiveDateTime>,
}

impl RankChange {
    pub fn is_highlighted(&self, now: NaiveDateTime) -> bool {
        self.highlight_until.is_some_and(|until| now < until)
    }
}

/// Per-student movement from `previous` to `next`. Students absent from
/// `previous` report `same` with a zero delta.
pub fn diff(
    previous: Option<&RankingSnapshot>,
    next: &RankingSnapshot,
    highlight_ms: i64,
) -> Vec<RankChange> {
    let before: HashMap<&str, &RankEntry> = previous
        .map(|p| {
            p.entries
                .iter()
                .map(|e| (e.student_id.as_str(), e))
                .collect()
        })
        .unwrap_or_default();
    let until = next.taken_at + Duration::milliseconds(highlight_ms);

    next.entries
        .iter()
        .map(|e| {
            let (moved, delta_score) = match before.get(e.student_id.as_str()) {
                Some(old) => {
                    let moved = if e.rank < old.rank {
                        Movement::Up
                    } else if e.rank > old.rank {
                        Movement::Down
                    } else {
                        Movement::Same
                    };
                    (moved, e.score - old.score)
                }
                None => (Movement::Same, 0),
            };
            let changed = moved != Movement::Same || delta_score != 0;
            RankChange {
                student_id: e.student_id.clone(),
                rank: e.rank,
                score: e.score,
                moved,
                delta_score,
                highlight_until: changed.then_some(until),
            }
        })
        .collect()
}

/// Current standings of the given students from their season scores.
pub fn ranking_snapshot<S: Store>(
    store: &S,
    student_ids: &[String],
    taken_at: NaiveDateTime,
) -> SchedResult<RankingSnapshot> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = student_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();
    let profiles = store.student_profiles(&ids)?;
    if profiles.len() != ids.len() {
        return Err(SchedError::NotFound("student"));
    }
    Ok(RankingSnapshot::from_scores(
        profiles
            .into_iter()
            .map(|p| (p.id, p.current_season_score)),
        taken_at,
    ))
}
