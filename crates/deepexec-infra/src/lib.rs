//! Infrastructure layer for the deep execution engine.
//!
//! Currently limited to locating and loading `deepexec.toml`.

pub mod config;
