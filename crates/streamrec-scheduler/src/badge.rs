//! Next-occurrence badge.
//!
//! Clients poll with the last change token they saw. The token is the store
//! revision, which every rule mutation bumps; the badge also bumps it when
//! the computed answer moves on by itself (a window started or ended), so a
//! matching token always means "nothing to redraw".

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use streamrec_types::NextRun;

use crate::Result;
use crate::clock::Clock;
use crate::occurrence;
use crate::store::ScheduleStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeReport {
    /// False when the caller's token is still current.
    pub changed: bool,
    pub change_token: u64,
    pub next: Option<NextRun>,
    /// A scheduled recording is in progress.
    pub recording: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BadgeView {
    next: Option<NextRun>,
    recording: bool,
}

#[derive(Debug)]
struct Published {
    token: u64,
    view: BadgeView,
}

pub struct NextOccurrenceBadge {
    store: Arc<ScheduleStore>,
    clock: Arc<dyn Clock>,
    published: Mutex<Option<Published>>,
}

impl NextOccurrenceBadge {
    pub fn new(store: Arc<ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            published: Mutex::new(None),
        }
    }

    /// Answer a poll. `since` is the token the client last saw, if any.
    pub async fn query(&self, since: Option<u64>) -> Result<BadgeReport> {
        let now = self.clock.now();
        let rules = self.store.list().await?;
        let state = self.store.load_run_state().await?;

        let view = BadgeView {
            next: occurrence::system_next_occurrence(&rules, now).map(|(rule, occ)| NextRun {
                id: rule.id.clone(),
                title: rule.title.clone(),
                next_run: occ.start,
                start_time: rule.start_time,
                end_time: rule.end_time,
            }),
            recording: state.owns_recording,
        };

        let mut published = self.published.lock().await;
        let mut token = self.store.revision().await?;
        let stale = match published.as_ref() {
            Some(p) => p.token == token && p.view != view,
            // First answer from this process; earlier tokens may describe
            // a different view.
            None => true,
        };
        if stale {
            token = self.store.bump_revision().await?;
            debug!(token, "Next-occurrence badge changed");
        }
        *published = Some(Published {
            token,
            view: view.clone(),
        });

        Ok(BadgeReport {
            changed: since != Some(token),
            change_token: token,
            next: view.next,
            recording: view.recording,
        })
    }
}
