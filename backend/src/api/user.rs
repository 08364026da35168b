// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use veilcommon::{crypto, identifiers::ConnectionId};

use crate::{ChatService, errors::ApiError, store::UserRecord};

use super::{
    parse,
    requests::{EmptyRequest, SetUserRequest, UsernameRequest},
};

/// Longest accepted biography, in characters.
const MAX_BIOGRAPHY_CHARS: usize = 500;

impl ChatService {
    /// Whether a username is taken. Deliberately available without login
    /// so the registration form can check early.
    pub(super) async fn username_exists(&self, payload: Value) -> Result<Value, ApiError> {
        let request: UsernameRequest = parse(payload)?;
        Ok(Value::Bool(
            UserRecord::exists(self.pool(), &request.username).await?,
        ))
    }

    /// Another user's public profile. While none of their connections are
    /// online the reported status is forced to "offline".
    pub(super) async fn get_user(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.require_login(connection)?;
        let request: UsernameRequest = parse(payload)?;
        let user = UserRecord::load(self.pool(), &request.username)
            .await?
            .ok_or(ApiError::UnknownUser)?;

        let mut profile = user.into_profile();
        if !self.router.is_user_online(&request.username) {
            profile.status = "offline".to_owned();
        }
        Ok(serde_json::to_value(profile)?)
    }

    /// The caller's own record, including the encrypted client blob.
    pub(super) async fn get_full_user(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let user = UserRecord::load(self.pool(), &username)
            .await?
            .ok_or(ApiError::LibraryError)?;
        Ok(serde_json::to_value(user.into_own_profile())?)
    }

    /// Public profiles of every registered user.
    pub(super) async fn get_user_list(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let profiles: Vec<_> = UserRecord::load_all(self.pool())
            .await?
            .into_iter()
            .map(UserRecord::into_profile)
            .collect();
        Ok(serde_json::to_value(profiles)?)
    }

    /// Update whitelisted profile fields. Replacing the SPK requires a
    /// fresh signature by the stored identity key. Broadcasts the public
    /// profile to everyone else.
    pub(super) async fn set_user(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: SetUserRequest = parse(payload)?;
        if request.is_empty() {
            return Err(ApiError::InvalidData);
        }

        let mut user = UserRecord::load(self.pool(), &username)
            .await?
            .ok_or(ApiError::LibraryError)?;

        if let Some(spk) = &request.spk {
            let sig = request.sig.as_deref().ok_or(ApiError::InvalidData)?;
            crypto::verify(&user.public_key, spk, sig)?;
            crypto::decompress(spk)?;
        }
        if let Some(biography) = &request.biography {
            if biography.chars().count() > MAX_BIOGRAPHY_CHARS {
                return Err(ApiError::InvalidData);
            }
        }

        let SetUserRequest {
            spk,
            sig,
            status,
            biography,
            profile_picture,
            own_storage,
        } = request;
        if let Some(spk) = spk {
            user.spk = Some(spk);
        }
        if let Some(sig) = sig {
            user.sig = Some(sig);
        }
        if let Some(status) = status {
            user.status = status;
        }
        if let Some(biography) = biography {
            user.biography = biography;
        }
        if let Some(profile_picture) = profile_picture {
            user.profile_picture = profile_picture;
        }
        if let Some(own_storage) = own_storage {
            user.own_storage = own_storage;
        }
        user.update(self.pool()).await?;

        let profile = serde_json::to_value(user.into_profile())?;
        self.router.notify_profile(Some(connection), profile);
        Ok(Value::Bool(true))
    }
}
