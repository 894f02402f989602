//! DOTS server resource layer.
//!
//! Session configuration negotiation, alias management and the registry of
//! observable resources that pushes committed changes to subscribed peers.

pub mod api;
pub mod config;
pub mod core;
pub mod messages;
pub mod models;
pub mod utils;
