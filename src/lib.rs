// ABOUTME: Library entry point for the SellerSync partner API integration engine
// ABOUTME: Wires credential brokering, request signing, sync scheduling, and recovery
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

#![deny(unsafe_code)]

//! # SellerSync
//!
//! A multi-tenant integration engine for a signed commerce partner API.
//! Each connected seller account brings its own long-lived refresh
//! credential; the engine turns those into short-lived access tokens and
//! temporary signing credentials, issues signed upstream calls, and keeps
//! per-account data syncs running on schedule with classified error recovery.
//!
//! ## Architecture
//!
//! - **auth**: token broker (refresh-token exchange, distributed single-flight,
//!   rotation persistence) and identity broker (role assumption)
//! - **signing**: canonical request signing as a pure function
//! - **gateway**: one authenticated upstream call with transport-level retry
//! - **queue** + **scheduler**: prioritized sync jobs on a periodic cadence
//! - **recovery**: the single authority deciding retry versus dead-letter
//! - **cache**: pluggable in-memory or Redis backend shared by every broker
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sellersync::config::EngineConfig;
//! use sellersync::engine::{EngineStores, SyncEngine};
//! use sellersync::errors::AppResult;
//! use sellersync::queue::worker::JobProcessor;
//! use sellersync::queue::Job;
//! use std::sync::Arc;
//!
//! struct MySyncProcessor;
//!
//! #[async_trait::async_trait]
//! impl JobProcessor for MySyncProcessor {
//!     async fn process(&self, job: &Job) -> AppResult<serde_json::Value> {
//!         // Pull the account's data through engine.gateway() here
//!         Ok(serde_json::json!({ "synced": job.name }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     sellersync::logging::init_from_env()?;
//!
//!     let engine = SyncEngine::open(
//!         EngineConfig::from_env(),
//!         EngineStores::in_memory(),
//!         Arc::new(MySyncProcessor),
//!     )
//!     .await?;
//!
//!     // ... serve until shutdown ...
//!     engine.close().await;
//!     Ok(())
//! }
//! ```

/// Credential types, token broker, and identity broker
pub mod auth;

/// Pluggable shared cache (in-memory or Redis) with atomic lock primitives
pub mod cache;

/// Error taxonomy, classification, and retry policies
pub mod classify;

/// Environment-driven configuration
pub mod config;

/// TTLs, key prefixes, and tuning limits
pub mod constants;

/// Engine registry and lifecycle
pub mod engine;

/// Unified error types and codes
pub mod errors;

/// Signed upstream API client with transport-level retry
pub mod gateway;

/// Distributed mutual exclusion over the shared cache
pub mod lock;

/// Structured logging setup
pub mod logging;

/// Work queue and worker pool
pub mod queue;

/// Error recovery coordination (retry versus dead-letter)
pub mod recovery;

/// Periodic sync scheduling and manual triggers
pub mod scheduler;

/// Request signing
pub mod signing;

/// Collaborator traits and in-memory implementations
pub mod storage;
