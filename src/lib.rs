//! Mfuko loan server library
//!
//! Reconciles the on-chain loan contract with an off-chain mirror and exposes
//! loan commands and views over HTTP.

pub mod chain;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod loan;
pub mod mirror;
pub mod models;
pub mod routes;
pub mod state;
pub mod sync;
