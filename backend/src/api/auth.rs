// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use veilcommon::{
    crypto::{self, LoginChallenge},
    identifiers::ConnectionId,
};

use crate::{
    ChatService,
    errors::ApiError,
    store::{DmRecord, UserRecord, X3dhInbox},
};

use super::{
    parse,
    requests::{ChallengeResponseRequest, LoginRequest, RegisterRequest},
};

impl ChatService {
    /// Start the challenge-response login. The challenge expectation and
    /// the username are parked in the session; the connection is not
    /// logged in yet.
    pub(super) async fn login(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let request: LoginRequest = parse(payload)?;
        let user = UserRecord::load(self.pool(), &request.username)
            .await?
            .ok_or(ApiError::UnknownUser)?;
        if self.sessions.is_logged_in(connection) {
            return Err(ApiError::AlreadyLoggedIn);
        }

        let LoginChallenge {
            challenge,
            expected,
        } = crypto::generate_challenge(&user.public_key)?;
        self.sessions
            .begin_challenge(connection, request.username, expected);
        Ok(Value::String(challenge))
    }

    /// Verify the answer to a pending challenge. The expectation is
    /// consumed either way. On success the connection joins its rooms,
    /// queued X3DH bundles are scheduled for replay, and the restored
    /// status is broadcast unless it is "offline".
    pub(super) async fn login_challenge_response(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let request: ChallengeResponseRequest = parse(payload)?;
        let expected = self
            .sessions
            .take_expected(connection)
            .ok_or(ApiError::NoPendingChallenge)?;
        if expected != request.response {
            return Err(ApiError::IncorrectResponse);
        }
        let username = self
            .sessions
            .complete_login(connection)
            .ok_or(ApiError::LibraryError)?;

        let mut txn = self.pool().begin().await?;
        let dm_ids = DmRecord::ids_for_user(txn.as_mut(), &username).await?;
        let bundles = X3dhInbox::take_all(txn.as_mut(), &username).await?;
        let user = UserRecord::load(txn.as_mut(), &username)
            .await?
            .ok_or(ApiError::LibraryError)?;
        txn.commit().await?;

        self.router.login_join(connection, &username, &dm_ids);
        self.router.queue_x3dh_replay(&username, bundles);

        if user.status != "offline" {
            let profile = serde_json::to_value(user.into_profile())?;
            self.router.notify_profile(Some(connection), profile);
        }
        Ok(Value::Bool(true))
    }

    /// Create a user. The identity key and SPK must decompress and the
    /// SPK signature must verify under the identity key.
    pub(super) async fn register(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let request: RegisterRequest = parse(payload)?;
        if self.sessions.is_logged_in(connection) {
            return Err(ApiError::AlreadyLoggedIn);
        }
        if UserRecord::exists(self.pool(), &request.username).await? {
            return Err(ApiError::UsernameTaken);
        }

        crypto::decompress(&request.public_key)?;
        crypto::verify(&request.public_key, &request.spk, &request.sig)?;
        crypto::decompress(&request.spk)?;

        let user = UserRecord::new(
            request.username,
            request.public_key,
            request.spk,
            request.sig,
            request.own_storage,
        );
        user.store(self.pool()).await?;
        Ok(Value::Bool(true))
    }
}
