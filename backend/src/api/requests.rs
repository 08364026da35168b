// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed request payloads, one struct per client event.
//!
//! Events that declare a fixed key set use `deny_unknown_fields`, so a
//! payload with extra or missing keys is rejected as a whole. `set_user`
//! and `set_message` instead accept any subset of their whitelist and
//! ignore unknown keys.

use serde::Deserialize;
use veilcommon::identifiers::{DmId, MessageId, ReactionId, ScheduleId, Username};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: Username,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeResponseRequest {
    pub response: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: Username,
    pub public_key: String,
    pub spk: String,
    pub sig: String,
    pub own_storage: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsernameRequest {
    pub username: Username,
}

/// Payload of events that take no parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyRequest {}

/// Whitelisted profile updates; everything else in the payload is
/// ignored.
#[derive(Debug, Deserialize)]
pub struct SetUserRequest {
    pub spk: Option<String>,
    pub sig: Option<String>,
    pub status: Option<String>,
    pub biography: Option<String>,
    pub profile_picture: Option<String>,
    pub own_storage: Option<String>,
}

impl SetUserRequest {
    pub fn is_empty(&self) -> bool {
        self.spk.is_none()
            && self.sig.is_none()
            && self.status.is_none()
            && self.biography.is_none()
            && self.profile_picture.is_none()
            && self.own_storage.is_none()
    }
}

/// Per-target X3DH keys in a `create_dm` call. Extra keys in the bundle
/// are ignored.
#[derive(Debug, Deserialize)]
pub struct CreateDmTarget {
    pub spk: String,
    pub ek: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDmRequest {
    pub usernames: Vec<Username>,
    pub messages: Vec<CreateDmTarget>,
    pub key_tree: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmRequest {
    pub id: DmId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetDmRequest {
    pub id: DmId,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub id: DmId,
    pub message: String,
    pub signature: String,
    /// Seconds until the message is inserted; 0 sends immediately.
    pub schedule: i64,
    /// Seconds after insertion until permanent deletion; 0 disables.
    pub delete: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRequest {
    pub id: MessageId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageHistoryRequest {
    pub id: DmId,
    /// ISO-8601 timestamp; only strictly older messages are returned.
    pub cursor: String,
    pub limit: i64,
}

/// Whitelisted message updates plus the mandatory message id; unknown
/// keys are ignored.
#[derive(Debug, Deserialize)]
pub struct SetMessageRequest {
    pub id: MessageId,
    pub message: Option<String>,
    pub signature: Option<String>,
    pub pinned: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelScheduledRequest {
    pub dm_id: DmId,
    pub schedule_id: ScheduleId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddReactionRequest {
    pub id: MessageId,
    pub reaction: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveReactionRequest {
    pub id: ReactionId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckFriendRequest {
    pub username: Username,
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinCallRequest {
    pub id: DmId,
    pub uuid: String,
}
