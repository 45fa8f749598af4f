//! Subcommands of the `swipe-signal` binary

pub mod ice;
pub mod peer;
pub mod serve;
pub mod session;
