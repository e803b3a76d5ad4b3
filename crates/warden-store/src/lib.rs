//! Cache-aside repository for users and sessions.

pub mod cache;
pub mod repository;

pub use cache::TtlCache;
pub use repository::{Repository, RepositoryConfig};
