//! # Frigate Relay Core
//!
//! Pure logic for Frigate Relay: the event model, camera/zone monitor
//! filter, caption composer, and the persistence trait for relay state.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O. The
//! root `frigate-relay` package supplies those adapters.

pub mod compose;
pub mod filter;
pub mod models;
pub mod monitor;
pub mod store;
