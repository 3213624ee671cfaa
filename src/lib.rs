//! QUORUM — Adaptive Bot-Weighting and Consensus Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod marketdata;
pub mod engine;
pub mod storage;
