//! Configuration Module
//!
//! Session settings loaded from the environment.

mod settings;

pub use settings::{
    ConfigError, ConnectionSettings, SessionConfig, TimeoutSettings, random_client_id,
};
