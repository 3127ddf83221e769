//! Movie upload and streaming service.
//!
//! Files live in an object store, one record per movie lives in SQLite, and
//! [`services::registry::MediaRegistry`] keeps the two in step.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
