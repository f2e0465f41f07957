//! Application domain and persistence modules.

pub mod context;
pub mod database;
pub mod domain;

mod uuids;

pub use uuids::TypedUuid;
