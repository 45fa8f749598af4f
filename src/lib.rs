pub mod commands;
pub mod config;
pub mod logger;
pub mod peer;
pub mod relay;
pub mod round;
pub mod session;
pub mod signaling;
pub mod store;
pub mod utils;
