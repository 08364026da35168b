// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use veilcommon::identifiers::ConnectionId;

use crate::{
    ChatService,
    errors::ApiError,
    store::{DmRecord, Relation},
};

use super::{parse, requests::DmRequest};

impl ChatService {
    /// Typing ping: no state, just fan-out to the DM room minus the
    /// typist. Individual DMs require the two members to (still) be
    /// friends; the check reads the member list in join order, which in a
    /// 2-member DM always covers the pair.
    pub(super) async fn ping_typing(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: DmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        let members = DmRecord::members(self.pool(), request.id).await?;
        if members.len() == 2
            && !Relation::are_friends(self.pool(), &members[0], &members[1]).await?
        {
            return Err(ApiError::MessagingRequiresFriendship);
        }

        self.router.notify_typing(connection, request.id, &username);
        Ok(Value::Bool(true))
    }
}
