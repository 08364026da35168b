// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Notification fan-out.
//!
//! Connections register an outbound channel; rooms group connections per
//! user (`ROOM_USER_{username}`) and per DM (`ROOM_DM_{id}_NOTIFICATION`).
//! Presence is derived from the user-room population: a user is online
//! while at least one logged-in connection remains. Delivery is
//! best-effort; reads of the room maps may be momentarily stale.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;
use veilcommon::identifiers::{ConnectionId, DmId, ScheduleId, Username};

/// Grace period between a login and the replay of parked X3DH bundles, so
/// the client can finish its post-login initialization first.
const X3DH_REPLAY_DELAY: Duration = Duration::from_secs(5);

fn user_room(username: &Username) -> String {
    format!("ROOM_USER_{username}")
}

fn dm_room(dm_id: DmId) -> String {
    format!("ROOM_DM_{dm_id}_NOTIFICATION")
}

/// A server-to-client notification as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub event: &'static str,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct RouterState {
    sinks: HashMap<ConnectionId, mpsc::UnboundedSender<OutboundEvent>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
    presence: HashMap<Username, HashSet<ConnectionId>>,
}

impl RouterState {
    fn enter_room(&mut self, connection: ConnectionId, room: String) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(connection);
        self.memberships.entry(connection).or_default().insert(room);
    }

    fn leave_room(&mut self, connection: ConnectionId, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        if let Some(rooms) = self.memberships.get_mut(&connection) {
            rooms.remove(room);
        }
    }

    fn send(&self, connection: ConnectionId, event: &OutboundEvent) {
        if let Some(sink) = self.sinks.get(&connection) {
            // The receiving half closes when the connection dies; the
            // disconnect cleanup will prune the entry.
            if sink.send(event.clone()).is_err() {
                debug!(%connection, event.event, "dropping notification for closed connection");
            }
        }
    }
}

/// Fan-out hub shared by all handlers. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    state: Arc<Mutex<RouterState>>,
    tasks: TaskTracker,
}

impl NotificationRouter {
    pub fn new(tasks: TaskTracker) -> Self {
        Self {
            state: Arc::new(Mutex::new(RouterState::default())),
            tasks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a connection's outbound channel. Called at accept time,
    /// before any event is handled.
    pub fn register_connection(
        &self,
        connection: ConnectionId,
        sink: mpsc::UnboundedSender<OutboundEvent>,
    ) {
        self.lock().sinks.insert(connection, sink);
    }

    /// Subscribe a freshly logged-in connection to its user-room and all
    /// of its DM rooms, and mark the user online.
    pub fn login_join(&self, connection: ConnectionId, username: &Username, dm_ids: &[DmId]) {
        let mut state = self.lock();
        state
            .presence
            .entry(username.clone())
            .or_default()
            .insert(connection);
        state.enter_room(connection, user_room(username));
        for dm_id in dm_ids {
            state.enter_room(connection, dm_room(*dm_id));
        }
    }

    /// Replay parked X3DH bundles to the user-room after the post-login
    /// grace period, preserving append order.
    pub fn queue_x3dh_replay(&self, username: &Username, bundles: Vec<Value>) {
        if bundles.is_empty() {
            return;
        }
        let router = self.clone();
        let username = username.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(X3DH_REPLAY_DELAY).await;
            for bundle in bundles {
                router.notify_x3dh(&username, bundle);
            }
        });
    }

    /// Subscribe every online member to a newly created DM's room.
    pub fn join_dm_room(&self, dm_id: DmId, members: &[Username]) {
        let mut state = self.lock();
        let room = dm_room(dm_id);
        for member in members {
            let connections: Vec<_> = state
                .presence
                .get(member)
                .into_iter()
                .flatten()
                .copied()
                .collect();
            for connection in connections {
                state.enter_room(connection, room.clone());
            }
        }
    }

    /// Unsubscribe all of a user's connections from a DM room (after
    /// leaving the DM).
    pub fn leave_dm_room(&self, username: &Username, dm_id: DmId) {
        let mut state = self.lock();
        let room = dm_room(dm_id);
        let connections: Vec<_> = state
            .presence
            .get(username)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        for connection in connections {
            state.leave_room(connection, &room);
        }
    }

    /// Drop a connection from every room and from the presence map.
    pub fn remove_connection(&self, connection: ConnectionId, username: Option<&Username>) {
        let mut state = self.lock();
        state.sinks.remove(&connection);
        if let Some(rooms) = state.memberships.remove(&connection) {
            for room in rooms {
                if let Some(members) = state.rooms.get_mut(&room) {
                    members.remove(&connection);
                    if members.is_empty() {
                        state.rooms.remove(&room);
                    }
                }
            }
        }
        if let Some(username) = username {
            if let Some(connections) = state.presence.get_mut(username) {
                connections.remove(&connection);
                if connections.is_empty() {
                    state.presence.remove(username);
                }
            }
        }
    }

    pub fn is_user_online(&self, username: &Username) -> bool {
        self.lock()
            .presence
            .get(username)
            .is_some_and(|connections| !connections.is_empty())
    }

    fn emit_to_room(
        &self,
        room: &str,
        event: &'static str,
        payload: Value,
        skip: Option<ConnectionId>,
    ) {
        let state = self.lock();
        let Some(members) = state.rooms.get(room) else {
            return;
        };
        let outbound = OutboundEvent { event, payload };
        for connection in members {
            if Some(*connection) == skip {
                continue;
            }
            state.send(*connection, &outbound);
        }
    }

    fn emit_to_all(&self, event: &'static str, payload: Value, skip: Option<ConnectionId>) {
        let state = self.lock();
        let outbound = OutboundEvent { event, payload };
        for connection in state.sinks.keys() {
            if Some(*connection) == skip {
                continue;
            }
            state.send(*connection, &outbound);
        }
    }

    /// Profile update, to everyone except the originating connection.
    pub fn notify_profile(&self, skip: Option<ConnectionId>, profile: Value) {
        self.emit_to_all("profile_notification", profile, skip);
    }

    /// DM metadata change, to the DM room.
    pub fn notify_dm(&self, dm_id: DmId, dm: Value) {
        self.emit_to_room(&dm_room(dm_id), "dm_notification", dm, None);
    }

    /// Typing ping, to the DM room minus the typist's connection.
    pub fn notify_typing(&self, skip: ConnectionId, dm_id: DmId, username: &Username) {
        self.emit_to_room(
            &dm_room(dm_id),
            "typing_notification",
            json!({ "id": dm_id, "username": username }),
            Some(skip),
        );
    }

    pub fn notify_message(&self, dm_id: DmId, message: Value) {
        self.emit_to_room(&dm_room(dm_id), "message_notification", message, None);
    }

    pub fn notify_message_change(&self, dm_id: DmId, message: Value) {
        self.emit_to_room(&dm_room(dm_id), "message_change_notification", message, None);
    }

    pub fn notify_message_delete(&self, dm_id: DmId, message_id: Value) {
        self.emit_to_room(
            &dm_room(dm_id),
            "message_delete_notification",
            message_id,
            None,
        );
    }

    /// Tell a sender their scheduled message went out.
    pub fn notify_scheduled_sent(&self, username: &Username, dm_id: DmId, schedule_id: ScheduleId) {
        self.emit_to_room(
            &user_room(username),
            "scheduled_message_sent_notification",
            json!({ "dm_id": dm_id, "schedule_id": schedule_id }),
            None,
        );
    }

    /// Pre-send warning for a scheduled message.
    pub fn notify_scheduled_soon(&self, username: &Username, dm_id: DmId, schedule_id: ScheduleId) {
        self.emit_to_room(
            &user_room(username),
            "scheduled_soon_notification",
            json!({ "dm_id": dm_id, "schedule_id": schedule_id }),
            None,
        );
    }

    pub fn notify_x3dh(&self, username: &Username, bundle: Value) {
        self.emit_to_room(&user_room(username), "x3dh_notification", bundle, None);
    }

    pub fn notify_friend_request(&self, sender: &Username, target: &Username) {
        self.emit_to_room(
            &user_room(target),
            "friend_request_notification",
            json!({ "username": sender }),
            None,
        );
    }

    /// Acceptance (or rejection) of a friend request, to the requester.
    pub fn notify_friend_request_ack(&self, requester: &Username, acker: &Username, accept: bool) {
        self.emit_to_room(
            &user_room(requester),
            "friend_request_accept_notification",
            json!({ "username": acker, "accept": accept }),
            None,
        );
    }

    /// Both ends of a dropped friendship learn the other party's name.
    pub fn notify_unfriend(&self, user: &Username, other: &Username) {
        self.emit_to_room(
            &user_room(other),
            "unfriend_notification",
            json!({ "username": user }),
            None,
        );
        self.emit_to_room(
            &user_room(user),
            "unfriend_notification",
            json!({ "username": other }),
            None,
        );
    }
}
