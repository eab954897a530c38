//! Wandersim fulfillment server library.
//!
//! Exposes the server as a library so the orchestrator and its collaborators
//! can be tested and reused outside the binary.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
