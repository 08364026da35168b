// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of pending scheduled messages.
//!
//! Entries are keyed by (DM, sender, schedule id); the id counts up from 1
//! per (DM, sender) pair. The registry owns the cancellation token of the
//! delivery task; the task itself is built by the send-message handler.
//! Entries survive the sender's disconnect.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use veilcommon::identifiers::{DmId, ScheduleId, Username};

#[derive(Debug, Clone)]
struct ScheduledEntry {
    message: String,
    signature: String,
    fire_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// A pending entry as shown to its sender in `get_dm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledMessageView {
    pub message: String,
    pub signature: String,
    #[serde(rename = "timestamp", with = "veilcommon::time::serde_ts")]
    pub fire_at: DateTime<Utc>,
}

type Registry = HashMap<(DmId, Username), BTreeMap<i64, ScheduledEntry>>;

#[derive(Debug, Clone, Default)]
pub struct MessageScheduler {
    inner: Arc<Mutex<Registry>>,
}

impl MessageScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next schedule id for this (DM, sender) pair and park
    /// the entry. Returns the id and the token the delivery task must
    /// watch.
    pub fn register(
        &self,
        dm_id: DmId,
        username: &Username,
        message: &str,
        signature: &str,
        fire_at: DateTime<Utc>,
    ) -> (ScheduleId, CancellationToken) {
        let mut registry = self.lock();
        let entries = registry.entry((dm_id, username.clone())).or_default();
        let schedule_id = entries
            .keys()
            .next_back()
            .map_or(ScheduleId::FIRST, |max| ScheduleId::new(max + 1));
        let cancel = CancellationToken::new();
        entries.insert(
            schedule_id.get(),
            ScheduledEntry {
                message: message.to_owned(),
                signature: signature.to_owned(),
                fire_at,
                cancel: cancel.clone(),
            },
        );
        (schedule_id, cancel)
    }

    /// Cancel a pending entry. Signals the delivery task and removes the
    /// entry; `false` when no such entry exists (already fired, cancelled,
    /// or never scheduled by this sender).
    pub fn cancel(&self, dm_id: DmId, username: &Username, schedule_id: ScheduleId) -> bool {
        let mut registry = self.lock();
        let Some(entries) = registry.get_mut(&(dm_id, username.clone())) else {
            return false;
        };
        match entries.remove(&schedule_id.get()) {
            Some(entry) => {
                entry.cancel.cancel();
                if entries.is_empty() {
                    registry.remove(&(dm_id, username.clone()));
                }
                true
            }
            None => false,
        }
    }

    /// Claim an entry at fire time. Returns `false` when the entry is
    /// gone, meaning a cancellation won the race and the send must not
    /// happen.
    pub fn take(&self, dm_id: DmId, username: &Username, schedule_id: ScheduleId) -> bool {
        let mut registry = self.lock();
        let Some(entries) = registry.get_mut(&(dm_id, username.clone())) else {
            return false;
        };
        let taken = entries.remove(&schedule_id.get()).is_some();
        if entries.is_empty() {
            registry.remove(&(dm_id, username.clone()));
        }
        taken
    }

    /// The sender's pending entries for one DM, keyed by schedule id.
    pub fn snapshot_for(
        &self,
        dm_id: DmId,
        username: &Username,
    ) -> BTreeMap<i64, ScheduledMessageView> {
        self.lock()
            .get(&(dm_id, username.clone()))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, entry)| {
                        (
                            *id,
                            ScheduledMessageView {
                                message: entry.message.clone(),
                                signature: entry.signature.clone(),
                                fire_at: entry.fire_at,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
