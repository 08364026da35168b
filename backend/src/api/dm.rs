// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::SqliteConnection;
use veilcommon::{
    crypto,
    identifiers::{ConnectionId, DmId, Username},
};

use crate::{
    ChatService,
    errors::{ApiError, StorageError},
    scheduler::ScheduledMessageView,
    store::{DmRecord, MessageRecord, MessageView, Relation, UserRecord, X3dhInbox},
};

use super::{
    parse, require_keys,
    requests::{CreateDmRequest, DmRequest, EmptyRequest, SetDmRequest},
};

/// Full DM object as returned by `get_dm`.
#[derive(Debug, Serialize)]
struct DmDetails {
    id: DmId,
    public_keys: Value,
    name: Option<String>,
    #[serde(with = "veilcommon::time::serde_ts")]
    created_at: DateTime<Utc>,
    users: Vec<Username>,
    latest_message: Option<MessageView>,
    users_in_call: HashMap<Username, String>,
    scheduled_messages: BTreeMap<i64, ScheduledMessageView>,
}

/// DM object as broadcast on metadata changes; carries no message.
#[derive(Debug, Serialize)]
struct DmNotification {
    id: DmId,
    public_keys: Value,
    name: Option<String>,
    #[serde(with = "veilcommon::time::serde_ts")]
    created_at: DateTime<Utc>,
    users: Vec<Username>,
    users_in_call: HashMap<Username, String>,
}

impl ChatService {
    /// Guard: the DM exists and the caller is a member.
    pub(super) async fn require_dm_access(
        &self,
        dm_id: DmId,
        username: &Username,
    ) -> Result<(), ApiError> {
        if !DmRecord::exists(self.pool(), dm_id).await?
            || !DmRecord::is_member(self.pool(), dm_id, username).await?
        {
            return Err(ApiError::NoDmAccess);
        }
        Ok(())
    }

    /// The payload of a `dm_notification`, without the latest message.
    pub(crate) async fn dm_notification_payload(
        &self,
        db: &mut SqliteConnection,
        dm_id: DmId,
    ) -> Result<Value, StorageError> {
        let record = DmRecord::load(&mut *db, dm_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        let users = DmRecord::members(&mut *db, dm_id).await?;
        let notification = DmNotification {
            id: record.id,
            public_keys: record.key_tree()?,
            name: record.name,
            created_at: record.created_at,
            users,
            users_in_call: self.calls.users_in_call(dm_id),
        };
        Ok(serde_json::to_value(notification)?)
    }

    /// Create a DM with the caller plus the targets, relay an X3DH bundle
    /// per target (queueing it when they are offline) and subscribe every
    /// online member to the new room. Individual DMs are unique per pair
    /// and require friendship.
    pub(super) async fn create_dm(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let sender = self.require_login(connection)?;
        let request: CreateDmRequest = parse(payload)?;
        if request.usernames.len() != request.messages.len() {
            return Err(ApiError::InvalidData);
        }

        for (username, keys) in request.usernames.iter().zip(&request.messages) {
            let user = UserRecord::load(self.pool(), username)
                .await?
                .ok_or(ApiError::UnknownUser)?;
            // A bundle built against a rotated SPK would never decrypt.
            if user.spk.as_deref() != Some(keys.spk.as_str()) {
                return Err(ApiError::SpkMismatch);
            }
            crypto::decompress(&keys.ek)?;
        }

        if request.usernames.len() == 1 {
            let target = &request.usernames[0];
            let pair = [sender.clone(), target.clone()];
            if DmRecord::member_set_exists(self.pool(), &pair).await? {
                return Err(ApiError::DuplicateIndividualDm);
            }
            if !Relation::are_friends(self.pool(), &sender, target).await? {
                return Err(ApiError::DmRequiresFriendship);
            }
        }

        for key in &request.key_tree {
            crypto::decompress(key)?;
        }

        let sender_record = UserRecord::load(self.pool(), &sender)
            .await?
            .ok_or(ApiError::LibraryError)?;

        let mut members = vec![sender.clone()];
        members.extend(request.usernames.iter().cloned());

        let mut txn = self.pool().begin().await?;
        let dm_id = DmRecord::create(txn.as_mut(), &members, &request.key_tree).await?;

        // Position 0 of the key tree is the creator.
        let mut online_bundles = Vec::new();
        for (position, (username, keys)) in request
            .usernames
            .iter()
            .zip(&request.messages)
            .enumerate()
            .map(|(i, pair)| (i + 1, pair))
        {
            let bundle = json!({
                "sender": sender,
                "ik": sender_record.public_key,
                "spk": keys.spk,
                "ek": keys.ek,
                "key_tree": request.key_tree,
                "position": position,
                "id": dm_id,
            });
            if self.router.is_user_online(username) {
                online_bundles.push((username.clone(), bundle));
            } else {
                X3dhInbox::enqueue(txn.as_mut(), username, &bundle).await?;
            }
        }
        txn.commit().await?;

        for (username, bundle) in online_bundles {
            self.router.notify_x3dh(&username, bundle);
        }
        self.router.join_dm_room(dm_id, &members);

        Ok(serde_json::to_value(dm_id)?)
    }

    /// Ids of every DM the caller is in.
    pub(super) async fn get_dms(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let ids = DmRecord::ids_for_user(self.pool(), &username).await?;
        Ok(serde_json::to_value(ids)?)
    }

    /// Full DM object: members, latest message with reactions, call
    /// membership and the caller's own pending scheduled messages.
    pub(super) async fn get_dm(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: DmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        let mut db = self.pool().acquire().await?;
        let record = DmRecord::load(db.as_mut(), request.id)
            .await?
            .ok_or(ApiError::NoDmAccess)?;
        let users = DmRecord::members(db.as_mut(), request.id).await?;
        let latest_message = match MessageRecord::latest_in_dm(db.as_mut(), request.id).await? {
            Some(message) => Some(message.with_reactions(db.as_mut()).await?),
            None => None,
        };

        let details = DmDetails {
            id: record.id,
            public_keys: record.key_tree()?,
            name: record.name,
            created_at: record.created_at,
            users,
            latest_message,
            users_in_call: self.calls.users_in_call(request.id),
            scheduled_messages: self.scheduler.snapshot_for(request.id, &username),
        };
        Ok(serde_json::to_value(details)?)
    }

    /// Rename a DM (group chats; the name is what changes in practice).
    pub(super) async fn set_dm(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        require_keys(&payload, &["id", "name"])?;
        let request: SetDmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        DmRecord::set_name(self.pool(), request.id, request.name.as_deref()).await?;

        let mut db = self.pool().acquire().await?;
        let notification = self.dm_notification_payload(db.as_mut(), request.id).await?;
        self.router.notify_dm(request.id, notification);
        Ok(Value::Bool(true))
    }

    /// Drop the caller from a DM. The DM itself survives, possibly with a
    /// single member.
    pub(super) async fn leave_dm(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: DmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        DmRecord::remove_member(self.pool(), request.id, &username).await?;
        self.router.leave_dm_room(&username, request.id);

        let mut db = self.pool().acquire().await?;
        let notification = self.dm_notification_payload(db.as_mut(), request.id).await?;
        self.router.notify_dm(request.id, notification);
        Ok(Value::Bool(true))
    }
}
