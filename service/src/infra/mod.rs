//! Infrastructure implementations.

pub mod cipher;
pub mod database;
pub mod upstream;

pub use self::{
    cipher::Vault,
    database::{mongo, Database, Mongo},
    upstream::{http, Upstream},
};
