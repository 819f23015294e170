//! NICL arrears gateway
//!
//! Authenticates operators, supervises the letter worker scripts, reports
//! the state of their output folders and guards the public letter links.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod folders;
pub mod jobs;
pub mod links;
pub mod middleware;
pub mod state;
pub mod store;

pub use state::{router, AppState};
