pub mod commands;
pub mod error;
pub mod migration;
pub mod output;
pub mod store;
