//! # Frigate Relay
//!
//! Forwards Frigate NVR detection events to a Telegram chat, one rich
//! message per event, with media attached when the NVR has it ready.
//! Operators switch notifications on and off from the chat at runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌───────┐   ┌───────┐   ┌─────────┐   ┌──────────┐
//! │  Poller  │──▶│ Filter │──▶│ Dedup │──▶│ Media │──▶│ Compose │──▶│ Dispatch │──▶ Telegram
//! │ (Frigate)│   └────────┘   └───────┘   └───────┘   └─────────┘   └────┬─────┘
//! └──────────┘                    ▲                                     │
//!                                 └───────────── resolution ────────────┘
//!                                                                        ▲
//! ┌──────────────────┐   toggle   ┌───────────────────┐                  │
//! │ Command listener │──────────▶│ ToggleStateStore  │──── gate ────────┘
//! └──────────────────┘            └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! frigate-relay init                       # create the state database
//! frigate-relay check                      # show camera/zone matrix, ping Frigate
//! frigate-relay run                        # relay until SIGINT/SIGTERM
//! frigate-relay state                      # inspect persisted state
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite `StateStore` |
//! | [`dedup`] | Resolved-event window |
//! | [`toggle`] | Notifications on/off switch |
//! | [`frigate`] | Frigate HTTP client |
//! | [`telegram`] | Telegram Bot API client |
//! | [`media`] | Media fetch with retry and fallback |
//! | [`dispatch`] | Toggle-gated delivery |
//! | [`pipeline`] | Poll loop |
//! | [`commands`] | Operator commands |
//! | [`relay`] | Process wiring |
//! | [`inspect`] | `check` / `state` output |
//!
//! Pure types (event model, monitor parsing, message composition, the
//! `StateStore` trait) live in the `frigate-relay-core` crate.

pub mod commands;
pub mod config;
pub mod db;
pub mod dedup;
pub mod dispatch;
pub mod frigate;
pub mod inspect;
pub mod media;
pub mod migrate;
pub mod pipeline;
pub mod relay;
pub mod sqlite_store;
pub mod telegram;
pub mod toggle;
