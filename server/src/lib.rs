//! Buffer Relay Server
//!
//! Accepts single chat messages over HTTP, buffers them in a Redis-backed
//! queue, and relays them in per-chat batches to an external webhook.

pub mod api;
pub mod config;
pub mod ingress;
pub mod queue;
pub mod relay;
pub mod types;
