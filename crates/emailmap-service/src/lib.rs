//! HTTP surface and wiring for the email index: trigger endpoint, lookups,
//! the Firestore REST store and the Google Doc text importer.

pub mod config;
pub mod error;
pub mod firestore;
pub mod gdoc;
pub mod server;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use state::AppState;
