pub mod config;
pub mod groups;
