//! Merge Sync Client Library
//!
//! Realtime client-state sync core for a grid merge game: a reconnecting
//! socket with a FIFO send queue and per-kind dispatch, a game state store
//! with optimistic premoves, and a cached session controller.
//!
//! # Features
//!
//! - `metrics_server` - Serve client counters over HTTP on `METRICS_PORT` (enabled by default)

pub mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod game;
pub mod metrics;
pub mod net;
pub mod notify;
