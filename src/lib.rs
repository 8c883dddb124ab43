pub mod config;
pub mod quest;
