//! Task and work-session payloads exchanged with the tracking service.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tracked task and its weekly time budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_name: String,
    pub hours_per_week: f64,
}

impl Task {
    #[must_use]
    pub fn new(task_name: impl Into<String>, hours_per_week: f64) -> Self {
        Self {
            task_name: task_name.into(),
            hours_per_week,
        }
    }
}

/// A block of time spent on a task.
///
/// `id` is only present on sessions read back from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub task_name: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start_ts: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub end_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl WorkSession {
    /// Length of the session. Zero if the end precedes the start.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        (self.end_ts - self.start_ts).max(TimeDelta::zero())
    }

    /// Length of the session in minutes, rounded half up.
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        (self.duration().num_milliseconds() + 30_000) / 60_000
    }
}

/// Server timestamps: RFC 3339, or an offset-less date-time taken as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}

/// A task suggestion with progress against its weekly effort target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedTask {
    pub task_name: String,
    pub desired_effort: f64,
    pub current_percent_effort: f64,
    #[serde(default)]
    pub last_session: Option<WorkSession>,
}

impl RecommendedTask {
    /// Effort already spent, in the same unit as `desired_effort`.
    #[must_use]
    pub fn completed_effort(&self) -> f64 {
        self.desired_effort * self.current_percent_effort / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainStatus {
    Busy,
    Idle,
    Onboarding,
}

impl BrainStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Idle => "idle",
            Self::Onboarding => "onboarding",
        }
    }
}

/// Server-side view of what the user is currently doing.
///
/// Unknown fields are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainState {
    pub brain_status: BrainStatus,
    #[serde(default)]
    pub last_session: Option<WorkSession>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Signed-in account details.
///
/// The service owns the schema; only the fields we display are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body for starting a work session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartSession {
    pub task_name: String,
    pub end_ts: DateTime<Utc>,
}

impl StartSession {
    /// Start a session on `task_name` that ends `length` from `now`.
    #[must_use]
    pub fn lasting(task_name: impl Into<String>, now: DateTime<Utc>, length: TimeDelta) -> Self {
        Self {
            task_name: task_name.into(),
            end_ts: now + length,
        }
    }
}

/// Request body for editing a past session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUpdate {
    pub id: String,
    pub changes: SessionChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionChanges {
    /// New duration in minutes.
    pub duration: u32,
    pub notes: String,
}
