//! Metascribe - metadata enrichment companion for Komga and Kavita
//!
//! This library crate exposes the core functionality for integration testing.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod ids;
pub mod jobs;
pub mod metadata;
pub mod notify;
pub mod providers;
pub mod ratelimit;
