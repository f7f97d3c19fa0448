pub mod config;
pub mod playlist;
