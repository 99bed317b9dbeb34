//! BSON document form of a [`session::Record`].

use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{session, user};

/// Stored form of a [`session::Record`].
///
/// Field names are the storage contract shared with previously written
/// session documents and must not change.
#[derive(Debug, Deserialize, Serialize)]
pub(super) struct SessionDocument {
    /// Internal ID assigned by MongoDB.
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(super) id: Option<ObjectId>,

    /// External session ID, unique per live session.
    #[serde(rename = "sessionId")]
    pub(super) session_id: String,

    /// Hash of the derived access token issued last.
    #[serde(rename = "sessionTokenHash")]
    pub(super) session_token_hash: String,

    /// Hash of the derived refresh token issued last.
    #[serde(rename = "refreshTokenHash")]
    pub(super) refresh_token_hash: String,

    /// Encrypted upstream access token.
    #[serde(rename = "upstreamAccessToken")]
    pub(super) upstream_access_token: String,

    /// Encrypted upstream refresh token.
    #[serde(rename = "upstreamRefreshToken")]
    pub(super) upstream_refresh_token: String,

    /// Snapshot of the upstream-provided user payload.
    #[serde(default)]
    pub(super) user: user::Payload,

    /// Moment the current token pair was issued.
    #[serde(rename = "issuedAt")]
    pub(super) issued_at: BsonDateTime,

    /// Moment the session was last used to authorize a request.
    #[serde(rename = "lastAccessAt")]
    pub(super) last_access_at: Option<BsonDateTime>,

    /// Moment the derived access token expires.
    #[serde(rename = "accessExpiresAt")]
    pub(super) access_expires_at: Option<BsonDateTime>,

    /// Moment the whole session expires.
    #[serde(rename = "refreshExpiresAt")]
    pub(super) refresh_expires_at: Option<BsonDateTime>,

    /// Moment the document was created.
    #[serde(rename = "createdAt")]
    pub(super) created_at: BsonDateTime,

    /// Moment the document was updated last.
    #[serde(rename = "updatedAt")]
    pub(super) updated_at: BsonDateTime,
}

impl From<session::Record> for SessionDocument {
    fn from(record: session::Record) -> Self {
        let session::Record {
            id,
            session_id,
            session_token_hash,
            refresh_token_hash,
            upstream_access_token,
            upstream_refresh_token,
            user,
            issued_at,
            last_access_at,
            access_expires_at,
            refresh_expires_at,
            created_at,
            updated_at,
        } = record;

        Self {
            id,
            session_id: session_id.into(),
            session_token_hash: session_token_hash.into(),
            refresh_token_hash: refresh_token_hash.into(),
            upstream_access_token: upstream_access_token.into(),
            upstream_refresh_token: upstream_refresh_token.into(),
            user,
            issued_at: to_bson(issued_at),
            last_access_at: last_access_at.map(to_bson),
            access_expires_at: access_expires_at.map(to_bson),
            refresh_expires_at: refresh_expires_at.map(to_bson),
            created_at: to_bson(created_at),
            updated_at: to_bson(updated_at),
        }
    }
}

impl TryFrom<SessionDocument> for session::Record {
    type Error = ();

    fn try_from(doc: SessionDocument) -> Result<Self, Self::Error> {
        let SessionDocument {
            id,
            session_id,
            session_token_hash,
            refresh_token_hash,
            upstream_access_token,
            upstream_refresh_token,
            user,
            issued_at,
            last_access_at,
            access_expires_at,
            refresh_expires_at,
            created_at,
            updated_at,
        } = doc;

        Ok(Self {
            id,
            session_id: session_id.into(),
            session_token_hash: session_token_hash.into(),
            refresh_token_hash: refresh_token_hash.into(),
            upstream_access_token: upstream_access_token.into(),
            upstream_refresh_token: upstream_refresh_token.into(),
            user,
            issued_at: from_bson(issued_at)?,
            last_access_at: last_access_at.map(from_bson).transpose()?,
            access_expires_at: access_expires_at.map(from_bson).transpose()?,
            refresh_expires_at: refresh_expires_at
                .map(from_bson)
                .transpose()?,
            created_at: from_bson(created_at)?,
            updated_at: from_bson(updated_at)?,
        })
    }
}

/// Converts a [`DateTimeOf`] into its stored BSON form.
///
/// [`DateTimeOf`]: common::DateTimeOf
pub(super) fn to_bson<Of: ?Sized>(
    dt: common::DateTimeOf<Of>,
) -> BsonDateTime {
    BsonDateTime::from_millis(dt.unix_timestamp_millis())
}

/// Converts a stored BSON datetime back into a [`DateTimeOf`].
///
/// [`DateTimeOf`]: common::DateTimeOf
fn from_bson<Of: ?Sized>(
    dt: BsonDateTime,
) -> Result<common::DateTimeOf<Of>, ()> {
    common::DateTimeOf::from_unix_timestamp_millis(dt.timestamp_millis())
        .ok_or(())
}
