//! taskdeck library
//!
//! Live task-list sync against a document store, plus a file import
//! pipeline that turns uploaded files into tasks.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod import;
pub mod logging;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;
