//! Durable store for hosts, monitored pairs, events and preferences
//!
//! The engine depends on persistence only through the `Repository` trait.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with migrations
//! - **In-Memory**: No persistence, for tests and config-seeded deployments
//!
//! ## Usage
//!
//! ```no_run
//! use vigil::storage::{Repository, sqlite::SqliteRepository};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = SqliteRepository::new("./vigil.db").await?;
//!     let pairs = repository.get_services_to_monitor().await?;
//!     println!("{} pairs to monitor", pairs.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::Repository;
pub use error::{RepositoryError, RepositoryResult};
pub use memory::MemoryRepository;
