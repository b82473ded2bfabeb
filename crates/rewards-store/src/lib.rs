//! Rewards Store: SQLite publisher info database + engine state files.

pub mod schema;
pub mod sqlite;
pub mod state;
pub mod types;

pub use sqlite::{PublisherStore, PUBLISHER_DB_FILE};
pub use state::StateStore;
pub use types::*;
