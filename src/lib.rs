pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod machine;
pub mod sync;
