use crate::db;
use crate::model::AttendanceStatus;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const POLICY_KEY: &str = "policy.attendance";

/// School-wide attendance and booking policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub present_points: i64,
    pub excused_points: i64,
    pub absent_points: i64,
    /// Minimum whole days between today and a makeup session.
    pub makeup_lead_days: i64,
    /// A makeup may not fall within this many days of another session.
    pub adjacency_days: i64,
    pub rank_highlight_ms: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            present_points: 100,
            excused_points: 50,
            absent_points: 0,
            makeup_lead_days: 1,
            adjacency_days: 1,
            rank_highlight_ms: 1200,
        }
    }
}

impl Policy {
    /// Points a status is worth; an unset status is worth nothing.
    pub fn points_for(&self, status: Option<AttendanceStatus>) -> i64 {
        match status {
            Some(AttendanceStatus::Present) => self.present_points,
            Some(AttendanceStatus::Excused) => self.excused_points,
            Some(AttendanceStatus::Absent) => self.absent_points,
            None => 0,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Applies a partial update. Unknown keys and out-of-range values are rejected.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "presentPoints" => self.present_points = parse_i64_range(v, k, -10_000, 10_000)?,
                "excusedPoints" => self.excused_points = parse_i64_range(v, k, -10_000, 10_000)?,
                "absentPoints" => self.absent_points = parse_i64_range(v, k, -10_000, 10_000)?,
                "makeupLeadDays" => self.makeup_lead_days = parse_i64_range(v, k, 0, 60)?,
                "adjacencyDays" => self.adjacency_days = parse_i64_range(v, k, 0, 30)?,
                "rankHighlightMs" => self.rank_highlight_ms = parse_i64_range(v, k, 0, 60_000)?,
                _ => return Err(format!("unknown policy field: {}", k)),
            }
        }
        Ok(())
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let Some(n) = v.as_i64() else {
        return Err(format!("{} must be an integer", key));
    };
    if n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

pub fn load_policy(conn: &Connection) -> anyhow::Result<Policy> {
    let mut policy = Policy::default();
    if let Some(saved) = db::settings_get_json(conn, POLICY_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort: a malformed historical value falls back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = policy.merge_patch(&single);
            }
        }
    }
    Ok(policy)
}

pub fn save_policy(conn: &Connection, policy: &Policy) -> anyhow::Result<()> {
    db::settings_set_json(conn, POLICY_KEY, &policy.to_json())
}
