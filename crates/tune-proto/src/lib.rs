pub mod catalog;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod recognition;
pub mod state;
pub mod store;
pub mod track;
