pub mod config;
pub mod error;
pub mod filter;
pub mod history;
pub mod import;
pub mod migrate;
pub mod model;
pub mod services;
pub mod store;
pub mod watch;

pub use config::AppConfig;
pub use error::{EngineError, StoreError};
pub use filter::{FilterSelection, SmartView};
pub use model::*;
pub use services::Workspace;
pub use store::{DocumentStore, SqliteStore, StoreAdapter};
