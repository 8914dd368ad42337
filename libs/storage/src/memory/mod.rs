//! In-memory doubles for the external stores
//!
//! Both can be switched into an unavailable state to exercise the
//! collaborator-failure paths.

mod cache;
mod repository;

pub use cache::{MemoryCache, MemoryCacheConfig};
pub use repository::MemoryRepository;
