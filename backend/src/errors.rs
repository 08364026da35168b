// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use thiserror::Error;
use veilcommon::crypto::CryptoError;

/// Errors while reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Error deserializing column: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Everything a handler can answer with a `success: false` envelope.
///
/// The doc comment of each variant is the exact client-visible string. The
/// auth guard appends lockout suffixes where applicable.
#[derive(Debug, Display, Error)]
pub enum ApiError {
    /// Invalid data format.
    InvalidData,
    /// Malformed data.
    MalformedData,
    /// Not logged in.
    NotLoggedIn,
    /// Already logged in.
    AlreadyLoggedIn,
    /// User does not exist.
    UnknownUser,
    /// Not expecting a challenge response right now.
    NoPendingChallenge,
    /// Incorrect response.
    IncorrectResponse,
    /// You have been locked out for 60 seconds.
    LockedOut,
    /// Username already exists.
    UsernameTaken,
    /// SPK does not match.
    SpkMismatch,
    /// DM with that user already exists.
    DuplicateIndividualDm,
    /// You need to be friends to make that DM.
    DmRequiresFriendship,
    /// You need to be friends to send messages here.
    MessagingRequiresFriendship,
    /// You do not have access to that DM.
    NoDmAccess,
    /// You do not have access to that message.
    NoMessageAccess,
    /// You do not have access to that reaction.
    NoReactionAccess,
    /// You cannot edit that message.
    CannotEditMessage,
    /// You did not schedule a message with that id.
    UnknownScheduledMessage,
    /// You cannot friend yourself.
    SelfFriendRequest,
    /// Could not friend that person.
    CannotFriend,
    /// You are already friends.
    AlreadyFriends,
    /// You have already sent a request.
    RequestAlreadySent,
    /// That user has already sent a request to you.
    RequestAlreadyReceived,
    /// That user did not send you a request.
    NoSuchRequest,
    /// You are not friends with that user.
    NotFriends,
    /// You cannot block that user.
    CannotBlock,
    /// You cannot unblock that user.
    CannotUnblock,
    /// You are not part of the call.
    NotInCall,
    /// Internal server error.
    Internal(#[source] StorageError),
    /// Internal server error.
    LibraryError,
}

impl ApiError {
    /// Failures in this class do not count towards the login-failure
    /// lockout; they correspond to raised exceptions rather than handler
    /// rejections.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            ApiError::MalformedData | ApiError::Internal(_) | ApiError::LibraryError
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::LibraryError)
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        ApiError::Internal(error)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        ApiError::Internal(error.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::Internal(error.into())
    }
}

// Hex decoding errors, invalid points and failed signature checks all
// surface the same way data-parsing failures do.
impl From<CryptoError> for ApiError {
    fn from(_: CryptoError) -> Self {
        ApiError::MalformedData
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_verbatim() {
        assert_eq!(ApiError::InvalidData.to_string(), "Invalid data format.");
        assert_eq!(ApiError::NotLoggedIn.to_string(), "Not logged in.");
        assert_eq!(
            ApiError::LockedOut.to_string(),
            "You have been locked out for 60 seconds."
        );
        assert_eq!(
            ApiError::NoDmAccess.to_string(),
            "You do not have access to that DM."
        );
    }

    #[test]
    fn exception_class_is_not_counted() {
        assert!(ApiError::MalformedData.is_exception());
        assert!(!ApiError::UnknownUser.is_exception());
        assert!(!ApiError::InvalidData.is_exception());
    }
}
