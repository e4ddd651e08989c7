pub mod commands;
pub mod config;
pub mod disk;
pub mod host;
pub mod repart;
