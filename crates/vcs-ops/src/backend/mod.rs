//! Repository backends implementing [`RepositoryLocation`](crate::session::RepositoryLocation).

#[cfg(feature = "memory")]
pub mod memory;
