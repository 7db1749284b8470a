//! Schedule administration against the local database.

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};
use clap::Subcommand;

use streamrec_config::StreamRecConfig;
use streamrec_scheduler::{NextOccurrenceBadge, ScheduleStore, SystemClock};
use streamrec_types::{Recurrence, RuleKind, ScheduleInput, ScheduleRule, TimeOfDay};

use crate::app::open_store;

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// List all schedules
    List,
    /// Add a schedule
    Add {
        /// Display name
        #[arg(short, long)]
        title: String,

        /// once, daily, weekly or monthly
        #[arg(short, long)]
        kind: RuleKind,

        /// Window start (HH:MM)
        #[arg(long)]
        start: TimeOfDay,

        /// Window end (HH:MM), must be after start
        #[arg(long)]
        end: TimeOfDay,

        /// Date for one-time schedules (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Weekdays for weekly schedules, 0 = Sunday (e.g. "1,3")
        #[arg(long, value_delimiter = ',')]
        weekdays: Vec<u8>,

        /// Days of month for monthly schedules (e.g. "1,15")
        #[arg(long, value_delimiter = ',')]
        monthdays: Vec<u8>,

        /// Store the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Delete a schedule
    Delete { id: String },
    /// Enable a schedule
    Enable { id: String },
    /// Disable a schedule
    Disable { id: String },
}

pub async fn run_schedules(config: &StreamRecConfig, command: ScheduleCommand) -> Result<()> {
    let store = open_store(config)?;
    match command {
        ScheduleCommand::List => {
            let rules = store.list().await?;
            if rules.is_empty() {
                println!("No schedules");
            }
            for rule in &rules {
                println!("{}", describe(rule));
            }
        }
        ScheduleCommand::Add {
            title,
            kind,
            start,
            end,
            date,
            weekdays,
            monthdays,
            disabled,
        } => {
            let recurrence = match kind {
                RuleKind::Once => match date {
                    Some(date) => Recurrence::Once { date },
                    None => bail!("--date is required for one-time schedules"),
                },
                RuleKind::Daily => Recurrence::Daily,
                RuleKind::Weekly => Recurrence::Weekly {
                    weekdays: weekdays.into_iter().collect(),
                },
                RuleKind::Monthly => Recurrence::Monthly {
                    monthdays: monthdays.into_iter().collect(),
                },
            };
            let input = ScheduleInput {
                title,
                enabled: !disabled,
                start_time: start,
                end_time: end,
                recurrence,
            };
            let id = store.add(input, Local::now().naive_local()).await?;
            println!("Added schedule {id}");
        }
        ScheduleCommand::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted schedule {id}");
        }
        ScheduleCommand::Enable { id } => set_enabled(&store, &id, true).await?,
        ScheduleCommand::Disable { id } => set_enabled(&store, &id, false).await?,
    }
    Ok(())
}

async fn set_enabled(store: &ScheduleStore, id: &str, enabled: bool) -> Result<()> {
    let changed = store.set_enabled(id, enabled).await?;
    let state = if enabled { "enabled" } else { "disabled" };
    if changed {
        println!("Schedule {id} {state}");
    } else {
        println!("Schedule {id} already {state}");
    }
    Ok(())
}

/// Print the next scheduled recording.
pub async fn run_next(config: &StreamRecConfig) -> Result<()> {
    let store = open_store(config)?;
    let badge = NextOccurrenceBadge::new(store, std::sync::Arc::new(SystemClock));
    let report = badge.query(None).await?;
    match report.next {
        Some(next) => println!(
            "{} at {} ({}-{})",
            next.title,
            next.next_run.format("%Y-%m-%d %H:%M"),
            next.start_time,
            next.end_time
        ),
        None => println!("No upcoming schedules"),
    }
    if report.recording {
        println!("Recording in progress");
    }
    Ok(())
}

fn describe(rule: &ScheduleRule) -> String {
    let when = match &rule.recurrence {
        Recurrence::Once { date } => date.to_string(),
        Recurrence::Daily => "daily".to_string(),
        Recurrence::Weekly { weekdays } => format!("weekly on {}", join(weekdays)),
        Recurrence::Monthly { monthdays } => format!("monthly on {}", join(monthdays)),
    };
    format!(
        "{}  {:<8} {}-{}  {:<24} {}",
        rule.id,
        if rule.enabled { "enabled" } else { "disabled" },
        rule.start_time,
        rule.end_time,
        when,
        rule.title
    )
}

fn join(days: &BTreeSet<u8>) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_describe_weekly() {
        let rule = ScheduleRule {
            id: "abc".into(),
            title: "Team sync".into(),
            enabled: true,
            start_time: "09:00".parse().unwrap(),
            end_time: "09:30".parse().unwrap(),
            recurrence: Recurrence::Weekly {
                weekdays: BTreeSet::from([1, 3]),
            },
            created: Utc::now(),
        };
        let line = describe(&rule);
        assert!(line.starts_with("abc"));
        assert!(line.contains("09:00-09:30"));
        assert!(line.contains("weekly on 1,3"));
        assert!(line.ends_with("Team sync"));
    }
}
