// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use veilcommon::{crypto, identifiers::ConnectionId};

use crate::{
    ChatService,
    errors::ApiError,
    store::{MessageRecord, ReactionRecord, UserRecord},
};

use super::{
    parse,
    requests::{AddReactionRequest, RemoveReactionRequest},
};

impl ChatService {
    /// React to a message in one of the caller's DMs. Returns the new
    /// reaction id.
    pub(super) async fn add_reaction(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: AddReactionRequest = parse(payload)?;
        let message = self.require_message_access(request.id, &username).await?;

        let sender = UserRecord::load(self.pool(), &username)
            .await?
            .ok_or(ApiError::LibraryError)?;
        crypto::verify(&sender.public_key, &request.reaction, &request.signature)?;

        let reaction_id = ReactionRecord::insert(
            self.pool(),
            request.id,
            &username,
            &request.reaction,
            &request.signature,
        )
        .await?;

        let mut db = self.pool().acquire().await?;
        let view = message.with_reactions(db.as_mut()).await?;
        self.router
            .notify_message_change(view.dm_id, serde_json::to_value(&view)?);
        Ok(serde_json::to_value(reaction_id)?)
    }

    /// Retract one of the caller's own reactions.
    pub(super) async fn remove_reaction(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: RemoveReactionRequest = parse(payload)?;

        let reaction = ReactionRecord::load(self.pool(), request.id)
            .await?
            .filter(|reaction| reaction.sender == username)
            .ok_or(ApiError::NoReactionAccess)?;

        ReactionRecord::delete(self.pool(), request.id).await?;

        let message = MessageRecord::load(self.pool(), reaction.message_id)
            .await?
            .ok_or(ApiError::LibraryError)?;
        let dm_id = message.dm_id;
        let mut db = self.pool().acquire().await?;
        let view = message.with_reactions(db.as_mut()).await?;
        self.router
            .notify_message_change(dm_id, serde_json::to_value(view)?);
        Ok(Value::Bool(true))
    }
}
