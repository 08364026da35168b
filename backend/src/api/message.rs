// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::error;
use veilcommon::{
    crypto,
    identifiers::{ConnectionId, DmId, MessageId, ScheduleId, Username},
    time,
};

use crate::{
    ChatService,
    errors::ApiError,
    store::{DmRecord, MessageRecord, Relation, UserRecord},
};

use super::{
    parse,
    requests::{
        CancelScheduledRequest, DmRequest, MessageHistoryRequest, MessageRequest,
        SendMessageRequest, SetMessageRequest,
    },
};

/// Seconds before the fire time at which the sender gets the
/// "will send soon" warning.
const SCHEDULE_WARNING_SECONDS: i64 = 60;

impl ChatService {
    /// Guard: the message exists and sits in one of the caller's DMs.
    /// Returns the record for reuse.
    pub(super) async fn require_message_access(
        &self,
        message_id: MessageId,
        username: &Username,
    ) -> Result<MessageRecord, ApiError> {
        let record = MessageRecord::load(self.pool(), message_id)
            .await?
            .ok_or(ApiError::NoMessageAccess)?;
        if !MessageRecord::visible_to(self.pool(), message_id, username).await? {
            return Err(ApiError::NoMessageAccess);
        }
        Ok(record)
    }

    /// Insert a message now, or park it in the scheduler when `schedule`
    /// is positive. A positive `delete` arms the self-destruct timer that
    /// runs after the insert. The acknowledgement returns immediately in
    /// both cases.
    pub(super) async fn send_message(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: SendMessageRequest = parse(payload)?;
        let dm_id = request.id;
        self.require_dm_access(dm_id, &username).await?;

        let members = DmRecord::members(self.pool(), dm_id).await?;
        if members.len() == 2
            && !Relation::are_friends(self.pool(), &members[0], &members[1]).await?
        {
            return Err(ApiError::MessagingRequiresFriendship);
        }

        let sender = UserRecord::load(self.pool(), &username)
            .await?
            .ok_or(ApiError::LibraryError)?;
        crypto::verify(&sender.public_key, &request.message, &request.signature)?;

        let SendMessageRequest {
            message,
            signature,
            schedule,
            delete,
            ..
        } = request;

        if schedule > 0 {
            let fire_at = time::now_delta(schedule);
            let (schedule_id, cancel) =
                self.scheduler
                    .register(dm_id, &username, &message, &signature, fire_at);
            let service = self.clone();
            self.tasks().spawn(async move {
                service
                    .run_scheduled_send(
                        cancel,
                        dm_id,
                        username,
                        schedule_id,
                        message,
                        signature,
                        schedule,
                        delete,
                    )
                    .await;
            });
            return Ok(Value::Bool(true));
        }

        let mut txn = self.pool().begin().await?;
        let record =
            MessageRecord::insert(txn.as_mut(), dm_id, &username, &message, &signature, delete)
                .await?;
        txn.commit().await?;

        let message_id = record.id;
        self.router
            .notify_message(dm_id, serde_json::to_value(record.into_view(vec![]))?);

        if delete > 0 {
            let service = self.clone();
            self.tasks().spawn(async move {
                tokio::time::sleep(Duration::from_secs(delete as u64)).await;
                service.destroy_message(dm_id, message_id).await;
            });
        }
        Ok(Value::Bool(true))
    }

    /// The delivery task of one scheduled message. Watches the
    /// cancellation token at every suspension point; once the registry
    /// entry is claimed the send is committed.
    #[allow(clippy::too_many_arguments)]
    async fn run_scheduled_send(
        &self,
        cancel: CancellationToken,
        dm_id: DmId,
        username: Username,
        schedule_id: ScheduleId,
        message: String,
        signature: String,
        schedule: i64,
        delete: i64,
    ) {
        let pre = (schedule - SCHEDULE_WARNING_SECONDS).max(0);
        let post = schedule - pre;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(pre as u64)) => {}
        }
        if pre > 0 {
            self.router
                .notify_scheduled_soon(&username, dm_id, schedule_id);
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(post as u64)) => {}
        }

        // A cancellation that won the race has removed the entry; the
        // send must not happen then.
        if !self.scheduler.take(dm_id, &username, schedule_id) {
            return;
        }

        let inserted = async {
            let mut txn = self.pool().begin().await?;
            let record =
                MessageRecord::insert(txn.as_mut(), dm_id, &username, &message, &signature, delete)
                    .await?;
            txn.commit().await?;
            Ok::<_, ApiError>(record)
        }
        .await;
        let record = match inserted {
            Ok(record) => record,
            Err(api_error) => {
                error!(%dm_id, %username, error = ?api_error, "scheduled send failed");
                return;
            }
        };

        let message_id = record.id;
        self.router
            .notify_scheduled_sent(&username, dm_id, schedule_id);
        match serde_json::to_value(record.into_view(vec![])) {
            Ok(view) => self.router.notify_message(dm_id, view),
            Err(serde_error) => error!(%dm_id, error = %serde_error, "message view serialization"),
        }

        if delete > 0 {
            tokio::time::sleep(Duration::from_secs(delete as u64)).await;
            self.destroy_message(dm_id, message_id).await;
        }
    }

    /// Permanently delete a self-destructing message and tell the room.
    async fn destroy_message(&self, dm_id: DmId, message_id: MessageId) {
        let deleted = async {
            let mut txn = self.pool().begin().await?;
            MessageRecord::delete(txn.as_mut(), message_id).await?;
            txn.commit().await?;
            Ok::<_, ApiError>(())
        }
        .await;
        match deleted {
            Ok(()) => self.router.notify_message_delete(dm_id, json!(message_id)),
            Err(api_error) => {
                error!(%dm_id, %message_id, error = ?api_error, "self-destruct failed");
            }
        }
    }

    /// A single message with its reactions.
    pub(super) async fn get_message(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: MessageRequest = parse(payload)?;
        let record = self.require_message_access(request.id, &username).await?;

        let mut db = self.pool().acquire().await?;
        let view = record.with_reactions(db.as_mut()).await?;
        Ok(serde_json::to_value(view)?)
    }

    /// Cursor pagination over a DM's log: up to `limit` messages strictly
    /// older than `cursor`, newest first, with reactions.
    pub(super) async fn get_message_history(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: MessageHistoryRequest = parse(payload)?;
        let cursor =
            time::parse_timestamp(&request.cursor).map_err(|_| ApiError::MalformedData)?;
        self.require_dm_access(request.id, &username).await?;

        let mut db = self.pool().acquire().await?;
        let records =
            MessageRecord::history(db.as_mut(), request.id, &cursor, request.limit).await?;
        let views = MessageRecord::attach_reactions(db.as_mut(), records).await?;
        Ok(serde_json::to_value(views)?)
    }

    /// All pinned messages of a DM, newest first.
    pub(super) async fn get_pinned(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: DmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        let mut db = self.pool().acquire().await?;
        let records = MessageRecord::pinned(db.as_mut(), request.id).await?;
        let views = MessageRecord::attach_reactions(db.as_mut(), records).await?;
        Ok(serde_json::to_value(views)?)
    }

    /// Edit or pin a message. Editing the ciphertext is restricted to the
    /// original sender and needs a fresh signature; the pin flag may be
    /// toggled by any member.
    pub(super) async fn set_message(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: SetMessageRequest = parse(payload)?;
        let mut record = self.require_message_access(request.id, &username).await?;

        if let Some(message) = request.message {
            if record.sender != username {
                return Err(ApiError::CannotEditMessage);
            }
            let signature = request.signature.clone().ok_or(ApiError::InvalidData)?;
            let editor = UserRecord::load(self.pool(), &username)
                .await?
                .ok_or(ApiError::LibraryError)?;
            crypto::verify(&editor.public_key, &message, &signature)?;
            record.message = message;
            record.signature = signature;
        } else if let Some(signature) = request.signature {
            record.signature = signature;
        }
        if let Some(pinned) = request.pinned {
            record.pinned = pinned;
        }
        record.update(self.pool()).await?;

        let dm_id = record.dm_id;
        let mut db = self.pool().acquire().await?;
        let view = record.with_reactions(db.as_mut()).await?;
        self.router
            .notify_message_change(dm_id, serde_json::to_value(view)?);
        Ok(Value::Bool(true))
    }

    /// Withdraw a pending scheduled message before it fires.
    pub(super) async fn cancel_scheduled_message(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: CancelScheduledRequest = parse(payload)?;
        if !self
            .scheduler
            .cancel(request.dm_id, &username, request.schedule_id)
        {
            return Err(ApiError::UnknownScheduledMessage);
        }
        Ok(Value::Bool(true))
    }
}
