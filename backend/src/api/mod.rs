// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The request surface.
//!
//! [`dispatch`] routes an inbound `(event, payload)` pair through the
//! guard pipeline and the matching handler, and shapes the outcome into
//! the uniform `{success, result}` envelope. Guard order matters: the
//! error guard is outermost (every outcome becomes an envelope), the
//! lockout/fail guard applies to the two auth events only, the
//! login-required guard sits at the top of each protected handler, and
//! payload validation happens when the typed request is parsed.

mod auth;
mod call;
mod dm;
mod message;
mod reaction;
pub mod requests;
mod social;
#[cfg(test)]
mod tests;
mod typing;
mod user;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, error};
use veilcommon::{
    identifiers::{ConnectionId, Username},
    time,
};

use crate::{ChatService, errors::ApiError, session::LoginFailure};

/// The acknowledgement sent back for every handled event. Failures carry
/// a human-readable string in `result`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub result: Value,
}

impl Envelope {
    fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::String(message.into()),
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload).map_err(|_| ApiError::InvalidData)
}

/// Require the payload to carry exactly the given key set. Used where a
/// nullable field would otherwise make a missing key indistinguishable
/// from an explicit null.
fn require_keys(payload: &Value, keys: &[&str]) -> Result<(), ApiError> {
    let map = payload.as_object().ok_or(ApiError::InvalidData)?;
    if map.len() == keys.len() && keys.iter().all(|key| map.contains_key(*key)) {
        Ok(())
    } else {
        Err(ApiError::InvalidData)
    }
}

/// Handle one client event. Returns `None` for event names the server
/// does not know; the transport sends no acknowledgement for those.
pub async fn dispatch(
    service: &ChatService,
    connection: ConnectionId,
    event: &str,
    payload: Value,
) -> Option<Envelope> {
    debug!(%connection, event, "handling event");

    let is_auth_event = matches!(event, "login" | "login_challenge_response");
    if is_auth_event && service.sessions.in_lockout(connection, time::now()) {
        debug!(%connection, "connection is in lockout");
        return Some(Envelope::failure(ApiError::LockedOut.to_string()));
    }

    let outcome = route(service, connection, event, payload).await?;

    let envelope = match outcome {
        Ok(result) => Envelope::success(result),
        Err(api_error) => {
            if api_error.is_internal() {
                error!(%connection, event, error = ?api_error, "handler failed");
            }
            let mut message = api_error.to_string();
            // Auth failures feed the lockout counter; exceptions
            // (malformed data, internal errors) do not.
            if is_auth_event && !api_error.is_exception() {
                match service.sessions.record_failure(connection, time::now()) {
                    LoginFailure::LockedOut => {
                        message = format!("{message} You have been locked out for 60 seconds.");
                    }
                    LoginFailure::AttemptsLeft(remaining) => {
                        message = format!("{message} {remaining} attempts left before lockout.");
                    }
                }
            }
            Envelope::failure(message)
        }
    };
    Some(envelope)
}

async fn route(
    service: &ChatService,
    connection: ConnectionId,
    event: &str,
    payload: Value,
) -> Option<Result<Value, ApiError>> {
    let outcome = match event {
        "login" => service.login(connection, payload).await,
        "login_challenge_response" => {
            service.login_challenge_response(connection, payload).await
        }
        "register" => service.register(connection, payload).await,

        "username_exists" => service.username_exists(payload).await,
        "get_user" => service.get_user(connection, payload).await,
        "get_full_user" => service.get_full_user(connection, payload).await,
        "get_user_list" => service.get_user_list(connection, payload).await,
        "set_user" => service.set_user(connection, payload).await,

        "create_dm" => service.create_dm(connection, payload).await,
        "get_dms" => service.get_dms(connection, payload).await,
        "get_dm" => service.get_dm(connection, payload).await,
        "set_dm" => service.set_dm(connection, payload).await,
        "leave_dm" => service.leave_dm(connection, payload).await,

        "send_message" => service.send_message(connection, payload).await,
        "get_message" => service.get_message(connection, payload).await,
        "get_message_history" => service.get_message_history(connection, payload).await,
        "get_pinned" => service.get_pinned(connection, payload).await,
        "set_message" => service.set_message(connection, payload).await,
        "cancel_scheduled_message" => {
            service.cancel_scheduled_message(connection, payload).await
        }

        "add_reaction" => service.add_reaction(connection, payload).await,
        "remove_reaction" => service.remove_reaction(connection, payload).await,

        "ping_typing" => service.ping_typing(connection, payload).await,

        "send_friend_request" => service.send_friend_request(connection, payload).await,
        "get_friend_requests" => service.get_friend_requests(connection, payload).await,
        "get_outgoing_requests" => service.get_outgoing_requests(connection, payload).await,
        "ack_friend_request" => service.ack_friend_request(connection, payload).await,
        "unfriend" => service.unfriend(connection, payload).await,
        "get_friends" => service.get_friends(connection, payload).await,

        "block_user" => service.block_user(connection, payload).await,
        "unblock_user" => service.unblock_user(connection, payload).await,
        "get_blocked" => service.get_blocked(connection, payload).await,

        "join_call" => service.join_call(connection, payload).await,
        "leave_call" => service.leave_call(connection, payload).await,

        _ => return None,
    };
    Some(outcome)
}

impl ChatService {
    /// The username behind a logged-in connection, or `Not logged in.`.
    fn require_login(&self, connection: ConnectionId) -> Result<Username, ApiError> {
        self.sessions
            .logged_in_username(connection)
            .ok_or(ApiError::NotLoggedIn)
    }
}
