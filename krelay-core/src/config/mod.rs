//! Configuration management for krelay
//!
//! Settings come from defaults, an optional `krelay.toml` and `KRELAY_*`
//! environment variables, in that order.
//!
//! ```rust,no_run
//! use krelay_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("Failed to load configuration");
//! println!("brokers: {:?}", config.brokers);
//! ```

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::ManagementConfig;
