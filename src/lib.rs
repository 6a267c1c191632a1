pub mod background;
pub mod bootstrap;
pub mod cli;
pub mod common;
pub mod config;
pub mod database;
pub mod models;
pub mod operations;
pub mod registry;
pub mod utils;
