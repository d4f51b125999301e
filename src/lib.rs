pub mod backup;
pub mod collections;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use error::{Operation, StoreError};
pub use store::Store;
