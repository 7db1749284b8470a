//! Validated, serialized access to schedule rules.

use chrono::{NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use streamrec_storage::RecStorage;
use streamrec_types::{EngineRunState, Recurrence, ScheduleInput, ScheduleRule};

use crate::occurrence;
use crate::{Result, SchedulerError};

/// The schedule store: rule CRUD with validation on top of [`RecStorage`].
///
/// Every read-modify-write runs under one store-wide lock, so readers never
/// observe a half-applied update.
pub struct ScheduleStore {
    storage: RecStorage,
    lock: Mutex<()>,
}

impl ScheduleStore {
    pub fn new(storage: RecStorage) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// List all rules, oldest first.
    pub async fn list(&self) -> Result<Vec<ScheduleRule>> {
        Ok(self.storage.list_rules().await?)
    }

    /// Get a rule by ID.
    pub async fn get(&self, id: &str) -> Result<ScheduleRule> {
        self.storage
            .get_rule(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Add a rule and return its new ID.
    ///
    /// One-time rules must end after `now`; that check only applies here,
    /// never on update.
    pub async fn add(&self, input: ScheduleInput, now: NaiveDateTime) -> Result<String> {
        validate(&input)?;
        if let Recurrence::Once { date } = &input.recurrence {
            if input.end_time.on(*date) <= now {
                return Err(SchedulerError::validation(
                    "date",
                    "one-time schedule must end in the future",
                ));
            }
        }

        let rule = ScheduleRule {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            enabled: input.enabled,
            start_time: input.start_time,
            end_time: input.end_time,
            recurrence: input.recurrence,
            created: Utc::now(),
        };

        let _guard = self.lock.lock().await;
        self.storage.insert_rule(&rule).await?;
        info!(schedule_id = %rule.id, kind = %rule.kind(), title = %rule.title, "Schedule added");
        Ok(rule.id)
    }

    /// Replace a rule's fields. The kind cannot change.
    pub async fn update(&self, id: &str, input: ScheduleInput) -> Result<ScheduleRule> {
        validate(&input)?;

        let _guard = self.lock.lock().await;
        let existing = self
            .storage
            .get_rule(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if existing.kind() != input.recurrence.kind() {
            return Err(SchedulerError::validation(
                "kind",
                format!(
                    "cannot change schedule kind from {} to {}",
                    existing.kind(),
                    input.recurrence.kind()
                ),
            ));
        }

        let rule = ScheduleRule {
            id: existing.id,
            title: input.title.trim().to_string(),
            enabled: input.enabled,
            start_time: input.start_time,
            end_time: input.end_time,
            recurrence: input.recurrence,
            created: existing.created,
        };

        match self.storage.replace_rule(&rule).await? {
            Some(_) => {
                info!(schedule_id = %rule.id, enabled = rule.enabled, "Schedule updated");
                Ok(rule)
            }
            None => Err(SchedulerError::NotFound(id.to_string())),
        }
    }

    /// Delete a rule.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.storage.delete_rule(id).await? {
            info!(schedule_id = %id, "Schedule deleted");
            Ok(())
        } else {
            Err(SchedulerError::NotFound(id.to_string()))
        }
    }

    /// Enable or disable a rule. Returns `true` if the flag changed.
    ///
    /// Enabling re-checks the selector, since a disabled rule may carry an
    /// empty one.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let existing = self
            .storage
            .get_rule(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if enabled {
            let mut input = ScheduleInput::from(existing);
            input.enabled = true;
            validate(&input)?;
        }

        Ok(self.storage.set_rule_enabled(id, enabled).await?)
    }

    /// Disable a rule if, as currently stored, it is an enabled one-time
    /// rule whose window has ended. Returns `true` if it was disabled.
    ///
    /// The check and the write happen under the store lock, so a rule
    /// rescheduled after the caller last listed it is left alone. A rule
    /// that no longer exists is not an error.
    pub async fn disable_if_expired(&self, id: &str, now: NaiveDateTime) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let Some(rule) = self.storage.get_rule(id).await? else {
            return Ok(false);
        };
        if !rule.enabled || !occurrence::has_expired(&rule, now) {
            return Ok(false);
        }
        Ok(self.storage.set_rule_enabled(id, false).await?)
    }

    /// Current change token.
    pub async fn revision(&self) -> Result<u64> {
        Ok(self.storage.revision().await?)
    }

    /// Advance the change token without touching rules.
    pub async fn bump_revision(&self) -> Result<u64> {
        Ok(self.storage.bump_revision().await?)
    }

    pub async fn load_run_state(&self) -> Result<EngineRunState> {
        Ok(self.storage.load_run_state().await?)
    }

    pub async fn save_run_state(&self, state: &EngineRunState) -> Result<()> {
        Ok(self.storage.save_run_state(state).await?)
    }
}

/// Check rule fields, naming the first offending one.
pub fn validate(input: &ScheduleInput) -> Result<()> {
    if input.title.trim().is_empty() {
        return Err(SchedulerError::validation("title", "title must not be empty"));
    }

    if input.end_time <= input.start_time {
        return Err(SchedulerError::validation(
            "end_time",
            format!(
                "end time {} must be after start time {}",
                input.end_time, input.start_time
            ),
        ));
    }

    match &input.recurrence {
        Recurrence::Once { .. } | Recurrence::Daily => {}
        Recurrence::Weekly { weekdays } => {
            if let Some(bad) = weekdays.iter().find(|d| **d > 6) {
                return Err(SchedulerError::validation(
                    "weekdays",
                    format!("weekday {bad} out of range 0-6"),
                ));
            }
            if input.enabled && weekdays.is_empty() {
                return Err(SchedulerError::validation(
                    "weekdays",
                    "select at least one weekday",
                ));
            }
        }
        Recurrence::Monthly { monthdays } => {
            if let Some(bad) = monthdays.iter().find(|d| !(1..=31).contains(*d)) {
                return Err(SchedulerError::validation(
                    "monthdays",
                    format!("day of month {bad} out of range 1-31"),
                ));
            }
            if input.enabled && monthdays.is_empty() {
                return Err(SchedulerError::validation(
                    "monthdays",
                    "select at least one day of the month",
                ));
            }
        }
    }

    Ok(())
}
