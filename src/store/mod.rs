//! On-disk view of a project bundle.

pub mod config;
pub mod files;
pub mod layout;
pub mod lock;
pub mod stage;
pub mod state_db;
