//! Watch tracker data layer: movies and series kept in a remote table, with
//! the device store as a read-through cache.

pub mod access;
pub mod config;
pub mod error;
pub mod http;
pub mod local;
pub mod models;
pub mod query;
pub mod remote;

pub use access::MovieAccess;
pub use error::ValidationError;
pub use models::{MediaType, Movie, MovieDraft, MoviePatch};
