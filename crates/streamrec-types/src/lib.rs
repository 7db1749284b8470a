use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ──────────────────── Time of Day ────────────────────

/// A wall-clock time of day with minute resolution, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day '{0}', expected HH:MM")]
pub struct TimeOfDayParseError(pub String);

impl TimeOfDay {
    /// Build a time of day, returning `None` when out of range.
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn to_naive_time(self) -> NaiveTime {
        // Range is checked in `new`/`from_str`, so this cannot fail.
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0).unwrap_or(NaiveTime::MIN)
    }

    /// Combine with a calendar date.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.to_naive_time())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeOfDayParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeOfDayParseError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u8 = h.parse().map_err(|_| err())?;
        let minute: u8 = m.parse().map_err(|_| err())?;
        Self::new(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ──────────────────── Schedule Rules ────────────────────

/// Rule kind tag. Immutable once a rule is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Once => "once",
            RuleKind::Daily => "daily",
            RuleKind::Weekly => "weekly",
            RuleKind::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RuleKind::Once),
            "daily" => Ok(RuleKind::Daily),
            "weekly" => Ok(RuleKind::Weekly),
            "monthly" => Ok(RuleKind::Monthly),
            other => Err(format!("unknown rule kind: {other}")),
        }
    }
}

/// When a rule recurs. Serialized inline with the rule, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// A single calendar date.
    Once { date: NaiveDate },
    /// Every day.
    Daily,
    /// Selected weekdays, 0 = Sunday .. 6 = Saturday.
    Weekly { weekdays: BTreeSet<u8> },
    /// Selected days of the month, 1..=31.
    Monthly { monthdays: BTreeSet<u8> },
}

impl Recurrence {
    pub fn kind(&self) -> RuleKind {
        match self {
            Recurrence::Once { .. } => RuleKind::Once,
            Recurrence::Daily => RuleKind::Daily,
            Recurrence::Weekly { .. } => RuleKind::Weekly,
            Recurrence::Monthly { .. } => RuleKind::Monthly,
        }
    }
}

/// A stored schedule rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    /// Opaque unique ID, assigned by the store.
    pub id: String,
    /// Display name.
    pub title: String,
    /// Disabled rules are kept but never evaluated as active.
    pub enabled: bool,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    /// Creation time, assigned by the store.
    pub created: DateTime<Utc>,
}

impl ScheduleRule {
    pub fn kind(&self) -> RuleKind {
        self.recurrence.kind()
    }
}

/// Caller-supplied fields for adding or replacing a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub title: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(flatten)]
    pub recurrence: Recurrence,
}

impl From<ScheduleRule> for ScheduleInput {
    fn from(rule: ScheduleRule) -> Self {
        Self {
            title: rule.title,
            enabled: rule.enabled,
            start_time: rule.start_time,
            end_time: rule.end_time,
            recurrence: rule.recurrence,
        }
    }
}

fn default_true() -> bool {
    true
}

// ──────────────────── Occurrences ────────────────────

/// A concrete `[start, end)` window produced by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The next scheduled recording across all rules, as shown by the badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextRun {
    pub id: String,
    pub title: String,
    pub next_run: NaiveDateTime,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

// ──────────────────── Engine / Recorder State ────────────────────

/// Process-wide scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// No recording desired or running.
    #[default]
    Idle,
    /// A start or stop call is in flight.
    Triggering,
    /// Desired and actual agree on "recording".
    Active,
}

/// Scheduler bookkeeping persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineRunState {
    pub last_tick: Option<NaiveDateTime>,
    pub desired: bool,
    /// Rule that most recently caused a start or stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rule_id: Option<String>,
    /// The running capture was started or adopted by the engine.
    pub owns_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// What the recording controller reports about the capture process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecorderStatus {
    pub active: bool,
    pub since: Option<NaiveDateTime>,
}

impl RecorderStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(since: NaiveDateTime) -> Self {
        Self {
            active: true,
            since: Some(since),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_parse_and_display() {
        let t: TimeOfDay = "09:05".parse().unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "09:05");

        let t: TimeOfDay = "7:30".parse().unwrap();
        assert_eq!(t.to_string(), "07:30");
    }

    #[test]
    fn test_time_of_day_rejects_garbage() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("10:60".parse::<TimeOfDay>().is_err());
        assert!("1030".parse::<TimeOfDay>().is_err());
        assert!("10:5".parse::<TimeOfDay>().is_err());
        assert!("ab:cd".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn test_time_of_day_ordering() {
        let a: TimeOfDay = "09:00".parse().unwrap();
        let b: TimeOfDay = "09:30".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_weekly_rule_serde() {
        let json = r#"{
            "id": "r1",
            "title": "Morning show",
            "enabled": true,
            "start_time": "09:00",
            "end_time": "09:30",
            "kind": "weekly",
            "weekdays": [1, 3],
            "created": "2025-03-01T08:00:00Z"
        }"#;
        let rule: ScheduleRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.kind(), RuleKind::Weekly);
        match &rule.recurrence {
            Recurrence::Weekly { weekdays } => {
                assert_eq!(weekdays.iter().copied().collect::<Vec<_>>(), vec![1, 3])
            }
            other => panic!("Expected Weekly, got {other:?}"),
        }

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["kind"], "weekly");
        assert_eq!(value["start_time"], "09:00");
    }

    #[test]
    fn test_once_input_requires_date() {
        let json = r#"{"title": "x", "start_time": "10:00", "end_time": "11:00", "kind": "once"}"#;
        let err = serde_json::from_str::<ScheduleInput>(json).unwrap_err();
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn test_input_enabled_defaults_true() {
        let json = r#"{"title": "x", "start_time": "10:00", "end_time": "11:00", "kind": "daily"}"#;
        let input: ScheduleInput = serde_json::from_str(json).unwrap();
        assert!(input.enabled);
        assert_eq!(input.recurrence, Recurrence::Daily);
    }

    #[test]
    fn test_engine_phase_serde() {
        assert_eq!(
            serde_json::to_string(&EnginePhase::Triggering).unwrap(),
            "\"triggering\""
        );
    }

    #[test]
    fn test_run_state_default() {
        let state = EngineRunState::default();
        assert!(state.last_tick.is_none());
        assert!(!state.desired);
        assert!(!state.owns_recording);
        assert_eq!(state.consecutive_failures, 0);
    }
}
