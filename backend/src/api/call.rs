// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use veilcommon::identifiers::ConnectionId;

use crate::{ChatService, errors::ApiError};

use super::{
    parse,
    requests::{DmRequest, JoinCallRequest},
};

impl ChatService {
    /// Enter (or re-enter) a DM's call under a client-supplied uuid.
    /// Returns the call membership after the change and broadcasts the
    /// DM.
    pub(super) async fn join_call(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: JoinCallRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        let membership = self.calls.join(request.id, &username, request.uuid);

        let mut db = self.pool().acquire().await?;
        let notification = self.dm_notification_payload(db.as_mut(), request.id).await?;
        self.router.notify_dm(request.id, notification);
        Ok(serde_json::to_value(membership)?)
    }

    /// Leave a DM's call and broadcast the DM.
    pub(super) async fn leave_call(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: DmRequest = parse(payload)?;
        self.require_dm_access(request.id, &username).await?;

        if !self.calls.leave(request.id, &username) {
            return Err(ApiError::NotInCall);
        }

        let mut db = self.pool().acquire().await?;
        let notification = self.dm_notification_payload(db.as_mut(), request.id).await?;
        self.router.notify_dm(request.id, notification);
        Ok(Value::Bool(true))
    }
}
