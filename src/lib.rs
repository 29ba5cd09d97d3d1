pub mod assets;
pub mod config;
pub mod database;
pub mod epg;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod matcher;
pub mod models;
pub mod providers;
pub mod services;
pub mod templates;
pub mod testing_utils;
pub mod utils;
