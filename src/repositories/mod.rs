//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities. The sync engine, health runner and
//! webhook reconciler depend only on this narrow read/write contract,
//! never on query internals.

pub mod app_connection;
pub mod repository;

pub use app_connection::AppConnectionRepository;
pub use repository::RepoRepository;
