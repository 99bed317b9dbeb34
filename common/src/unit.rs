//! Marker types.

/// Marker type describing an entity creation.
#[derive(Clone, Copy, Debug)]
pub struct Creation;

/// Marker type describing an entity update.
#[derive(Clone, Copy, Debug)]
pub struct Update;

/// Marker type describing an entity issuance.
#[derive(Clone, Copy, Debug)]
pub struct Issuance;

/// Marker type describing an entity access.
#[derive(Clone, Copy, Debug)]
pub struct Access;

/// Marker type describing an entity expiration.
#[derive(Clone, Copy, Debug)]
pub struct Expiration;
