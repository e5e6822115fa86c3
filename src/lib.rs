pub mod address;
pub mod bridge;
pub mod config;
pub mod consts;
pub mod error;
pub mod evok;
pub mod homeassistant;
pub mod mapping;
