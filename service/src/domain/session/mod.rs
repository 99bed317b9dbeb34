//! Session definitions.

pub mod token;

#[cfg(doc)]
use common::DateTime;
use common::{unit, DateTimeOf};
use derive_more::{AsRef, Display, From, Into};
use mongodb::bson::oid::ObjectId;
use uuid::Uuid;

use crate::domain::user;

pub use self::token::Token;

/// Server-side session backing a derived [`Token`] pair.
///
/// One [`Record`] exists per live [`Id`]: a login creates it, a refresh
/// rewrites its token material in place, and the per-user trim policy or the
/// expired-session purge deletes it.
#[derive(Clone, Debug)]
pub struct Record {
    /// Internal ID assigned by the session store.
    pub id: Option<ObjectId>,

    /// [`Id`] of the session this [`Record`] describes.
    pub session_id: Id,

    /// [`token::Hash`] of the derived access [`Token`] issued last.
    pub session_token_hash: token::Hash,

    /// [`token::Hash`] of the derived refresh [`Token`] issued last.
    pub refresh_token_hash: token::Hash,

    /// Upstream access token, encrypted for storage.
    pub upstream_access_token: CipherText,

    /// Upstream refresh token, encrypted for storage.
    pub upstream_refresh_token: CipherText,

    /// Snapshot of the [`user::Payload`] returned by the upstream provider.
    pub user: user::Payload,

    /// [`DateTime`] when the current derived [`Token`] pair was issued.
    pub issued_at: IssuanceDateTime,

    /// [`DateTime`] when this session was last used to authorize a request.
    pub last_access_at: Option<AccessDateTime>,

    /// [`DateTime`] when the derived access [`Token`] expires.
    ///
    /// [`None`] means the access [`Token`] never expires.
    pub access_expires_at: Option<ExpirationDateTime>,

    /// [`DateTime`] when the whole session expires.
    ///
    /// Once elapsed, the session cannot be refreshed anymore and a new login
    /// is required. [`None`] means the session never expires.
    pub refresh_expires_at: Option<ExpirationDateTime>,

    /// [`DateTime`] when this [`Record`] was created.
    pub created_at: CreationDateTime,

    /// [`DateTime`] when this [`Record`] was updated last.
    pub updated_at: UpdateDateTime,
}

/// ID of a session.
///
/// Opaque, globally unique, generated fresh on every login and stable across
/// refreshes.
#[derive(
    AsRef, Clone, Debug, Display, Eq, From, Hash, Into, PartialEq,
)]
#[as_ref(str, String)]
pub struct Id(String);

impl Id {
    /// Generates a new random [`Id`].
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

/// Encrypted upstream credential material, as stored at rest.
///
/// An empty [`CipherText`] represents an absent upstream token, so "absent"
/// stays distinguishable from "encrypted empty".
#[derive(AsRef, Clone, Debug, Eq, From, Into, PartialEq)]
#[as_ref(str, String)]
pub struct CipherText(String);

impl CipherText {
    /// Indicates whether this [`CipherText`] holds no upstream token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Arguments of the access-touch update of a [`Record`].
///
/// Bumps `lastAccessAt`/`updatedAt` only, leaving the token material intact.
#[derive(Clone, Debug)]
pub struct Touch {
    /// [`Id`] of the session to touch.
    pub session_id: Id,

    /// [`DateTime`] of the access.
    pub at: AccessDateTime,
}

/// Replacement token material of a [`Record`], applied by a refresh.
#[derive(Clone, Debug)]
pub struct RewrittenTokens {
    /// [`Id`] of the session to rewrite.
    pub session_id: Id,

    /// New [`token::Hash`] of the derived access [`Token`].
    pub session_token_hash: token::Hash,

    /// New [`token::Hash`] of the derived refresh [`Token`].
    pub refresh_token_hash: token::Hash,

    /// New encrypted upstream access token.
    pub upstream_access_token: CipherText,

    /// New encrypted upstream refresh token.
    pub upstream_refresh_token: CipherText,

    /// New expiration [`DateTime`] of the derived access [`Token`].
    pub access_expires_at: Option<ExpirationDateTime>,

    /// New expiration [`DateTime`] of the whole session.
    pub refresh_expires_at: Option<ExpirationDateTime>,

    /// [`DateTime`] when the new [`Token`] pair was issued.
    pub at: IssuanceDateTime,
}

/// Selector of [`Record`]s exceeding the per-user session cap.
///
/// Matches [`Record`]s by any non-empty key of the [`user::Identity`] and
/// keeps the `keep` most recently issued ones.
#[derive(Clone, Debug)]
pub struct Trim {
    /// [`user::Identity`] whose sessions are capped.
    pub identity: user::Identity,

    /// Number of the most recently issued [`Record`]s to keep.
    ///
    /// `0` deletes every matching [`Record`].
    pub keep: usize,
}

/// Selector of [`Record`]s whose refresh window has elapsed.
#[derive(Clone, Copy, Debug)]
pub struct Expired(pub ExpirationDateTime);

/// [`DateTime`] when a [`Token`] pair of a [`Record`] was issued.
pub type IssuanceDateTime = DateTimeOf<(Record, unit::Issuance)>;

/// [`DateTime`] when a [`Record`] was last used to authorize a request.
pub type AccessDateTime = DateTimeOf<(Record, unit::Access)>;

/// [`DateTime`] when a [`Token`] or a whole session expires.
pub type ExpirationDateTime = DateTimeOf<(Record, unit::Expiration)>;

/// [`DateTime`] when a [`Record`] was created.
pub type CreationDateTime = DateTimeOf<(Record, unit::Creation)>;

/// [`DateTime`] when a [`Record`] was updated last.
pub type UpdateDateTime = DateTimeOf<(Record, unit::Update)>;
