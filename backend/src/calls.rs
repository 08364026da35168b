// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-DM call membership: which users currently sit in a DM's call and
//! under which client-supplied uuid. In memory only; a user's entries are
//! purged when their last interest in them ends (leave or disconnect).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use veilcommon::identifiers::{DmId, Username};

type CallMap = HashMap<DmId, HashMap<Username, String>>;

#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    inner: Arc<Mutex<CallMap>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CallMap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a user into a DM's call; re-joining replaces the uuid. Returns
    /// the call membership after the change.
    pub fn join(&self, dm_id: DmId, username: &Username, uuid: String) -> HashMap<Username, String> {
        let mut calls = self.lock();
        let call = calls.entry(dm_id).or_default();
        call.insert(username.clone(), uuid);
        call.clone()
    }

    /// Remove a user from a DM's call; `false` when they were not in it.
    pub fn leave(&self, dm_id: DmId, username: &Username) -> bool {
        let mut calls = self.lock();
        let Some(call) = calls.get_mut(&dm_id) else {
            return false;
        };
        let removed = call.remove(username).is_some();
        if call.is_empty() {
            calls.remove(&dm_id);
        }
        removed
    }

    /// Current membership of a DM's call (empty when nobody joined).
    pub fn users_in_call(&self, dm_id: DmId) -> HashMap<Username, String> {
        self.lock().get(&dm_id).cloned().unwrap_or_default()
    }

    /// Drop the user from every call; returns the affected DMs. Used at
    /// disconnect time.
    pub fn purge_user(&self, username: &Username) -> Vec<DmId> {
        let mut calls = self.lock();
        let mut affected = Vec::new();
        calls.retain(|dm_id, call| {
            if call.remove(username).is_some() {
                affected.push(*dm_id);
            }
            !call.is_empty()
        });
        affected
    }
}
