// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The social graph: friend requests, friendships and blocks.
//!
//! Allowed transitions (sender s, target t):
//! - request: s≠t, t exists, no block t→s, not friends, no request in
//!   either direction; a stale block s→t is dropped on the way.
//! - accept: flips the stored request edge to friend and drops the
//!   acker's own block; reject deletes the edge.
//! - block: silently unfriends and retracts the sender's pending
//!   request, then inserts the directed block edge.

use serde_json::Value;
use veilcommon::identifiers::ConnectionId;

use crate::{
    ChatService,
    errors::ApiError,
    store::{Relation, RelationStatus, UserRecord},
};

use super::{
    parse,
    requests::{AckFriendRequest, EmptyRequest, UsernameRequest},
};

impl ChatService {
    pub(super) async fn send_friend_request(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let sender = self.require_login(connection)?;
        let request: UsernameRequest = parse(payload)?;
        let target = request.username;

        if sender == target {
            return Err(ApiError::SelfFriendRequest);
        }
        if !UserRecord::exists(self.pool(), &target).await?
            || Relation::exists(self.pool(), &target, &sender, RelationStatus::Block).await?
        {
            return Err(ApiError::CannotFriend);
        }
        if Relation::are_friends(self.pool(), &sender, &target).await? {
            return Err(ApiError::AlreadyFriends);
        }
        if Relation::exists(self.pool(), &sender, &target, RelationStatus::Request).await? {
            return Err(ApiError::RequestAlreadySent);
        }
        if Relation::exists(self.pool(), &target, &sender, RelationStatus::Request).await? {
            return Err(ApiError::RequestAlreadyReceived);
        }

        let mut txn = self.pool().begin().await?;
        // Requesting implies the sender no longer wants their own block.
        if Relation::exists(txn.as_mut(), &sender, &target, RelationStatus::Block).await? {
            Relation::delete(txn.as_mut(), &sender, &target).await?;
        }
        Relation::insert(txn.as_mut(), &sender, &target, RelationStatus::Request).await?;
        txn.commit().await?;

        self.router.notify_friend_request(&sender, &target);
        Ok(Value::Bool(true))
    }

    /// Incoming pending requests.
    pub(super) async fn get_friend_requests(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let usernames =
            Relation::incoming(self.pool(), &username, RelationStatus::Request).await?;
        Ok(serde_json::to_value(usernames)?)
    }

    /// Outgoing pending requests.
    pub(super) async fn get_outgoing_requests(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let usernames =
            Relation::outgoing(self.pool(), &username, RelationStatus::Request).await?;
        Ok(serde_json::to_value(usernames)?)
    }

    /// Accept or reject a request that was sent to the caller.
    pub(super) async fn ack_friend_request(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let acker = self.require_login(connection)?;
        let request: AckFriendRequest = parse(payload)?;
        let requester = request.username;

        if !UserRecord::exists(self.pool(), &requester).await?
            || !Relation::exists(self.pool(), &requester, &acker, RelationStatus::Request).await?
        {
            return Err(ApiError::NoSuchRequest);
        }
        if Relation::are_friends(self.pool(), &requester, &acker).await? {
            return Err(ApiError::AlreadyFriends);
        }

        let mut txn = self.pool().begin().await?;
        if request.accept {
            Relation::set_status(txn.as_mut(), &requester, &acker, RelationStatus::Friend).await?;
            // Accepting implies the acker no longer wants their block.
            if Relation::exists(txn.as_mut(), &acker, &requester, RelationStatus::Block).await? {
                Relation::delete(txn.as_mut(), &acker, &requester).await?;
            }
        } else {
            Relation::delete(txn.as_mut(), &requester, &acker).await?;
        }
        txn.commit().await?;

        self.router
            .notify_friend_request_ack(&requester, &acker, request.accept);
        Ok(Value::Bool(true))
    }

    pub(super) async fn unfriend(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let request: UsernameRequest = parse(payload)?;
        let other = request.username;

        if !UserRecord::exists(self.pool(), &other).await?
            || !Relation::are_friends(self.pool(), &username, &other).await?
        {
            return Err(ApiError::NotFriends);
        }

        Relation::delete_friendship(self.pool(), &username, &other).await?;
        self.router.notify_unfriend(&username, &other);
        Ok(Value::Bool(true))
    }

    /// The caller's friends, reading the stored edge in both directions.
    pub(super) async fn get_friends(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let usernames =
            Relation::involving(self.pool(), &username, RelationStatus::Friend).await?;
        Ok(serde_json::to_value(usernames)?)
    }

    pub(super) async fn block_user(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let sender = self.require_login(connection)?;
        let request: UsernameRequest = parse(payload)?;
        let target = request.username;

        if !UserRecord::exists(self.pool(), &target).await?
            || Relation::exists(self.pool(), &sender, &target, RelationStatus::Block).await?
        {
            return Err(ApiError::CannotBlock);
        }

        let mut txn = self.pool().begin().await?;
        if Relation::are_friends(txn.as_mut(), &sender, &target).await? {
            Relation::delete_friendship(txn.as_mut(), &sender, &target).await?;
        }
        if Relation::exists(txn.as_mut(), &sender, &target, RelationStatus::Request).await? {
            Relation::delete(txn.as_mut(), &sender, &target).await?;
        }
        Relation::insert(txn.as_mut(), &sender, &target, RelationStatus::Block).await?;
        txn.commit().await?;
        Ok(Value::Bool(true))
    }

    pub(super) async fn unblock_user(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let sender = self.require_login(connection)?;
        let request: UsernameRequest = parse(payload)?;
        let target = request.username;

        if !Relation::exists(self.pool(), &sender, &target, RelationStatus::Block).await? {
            return Err(ApiError::CannotUnblock);
        }
        Relation::delete(self.pool(), &sender, &target).await?;
        Ok(Value::Bool(true))
    }

    /// Outgoing blocks only; the other party's blocks stay invisible.
    pub(super) async fn get_blocked(
        &self,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let username = self.require_login(connection)?;
        let _: EmptyRequest = parse(payload)?;
        let usernames = Relation::outgoing(self.pool(), &username, RelationStatus::Block).await?;
        Ok(serde_json::to_value(usernames)?)
    }
}
