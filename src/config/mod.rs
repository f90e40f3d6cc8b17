//! # Configuration
//!
//! Environment-driven configuration for the controllers, webhook engines,
//! object store and content loader.

mod controller;

pub use controller::{
    ConflictRetryConfig, ControllerConfig, KindConfig, LoaderConfig, StoreConfig, WebhookConfig,
};
