pub mod canonical;
pub mod checkpoint;
pub mod constants;
pub mod errors;
pub mod mapping;
pub mod models;
pub mod run;
pub mod schema;
pub mod validation;
pub mod value;

// Re-exports for other dbshift crates
pub use chrono;
pub use indexmap;
pub use indicatif;
pub use log;
pub use ordered_float;
pub use prettytable;
pub use rust_decimal;
pub use serde;
pub use serde_json;
pub use serde_yaml;
pub use thiserror;
pub use tracing;
pub use uuid;
