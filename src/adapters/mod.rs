//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `tfhe`: tfhe-rs fixed-point engine for the sensitive path
//! - `http`: reqwest client for remote compute endpoints
//! - `server`: axum server hosting one compute service
//! - `sanitize`: secret filtering for logs

pub mod http;
pub mod sanitize;
pub mod server;
pub mod tfhe;
