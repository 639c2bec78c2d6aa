//! # Waygate - Workflow Orchestration Gateway
//!
//! Waygate discovers declarative `Workflow` and `Task` resources from a
//! Kubernetes-style registry, synthesizes an HTTP surface for invoking
//! and inspecting them, executes each workflow's task DAG with bounded
//! concurrency and a per-execution timeout, and streams execution
//! progress over server-sent events.
//!
//! ## Core Modules
//!
//! - [`discovery`] - TTL-bounded cache over the resource registry
//! - [`endpoints`] - synthesized per-workflow endpoint registry
//! - [`blast_radius`] - which workflows reference which tasks
//! - [`orchestrator`] - task DAG execution with bounded concurrency
//! - [`execution`] - the execution lifecycle and HTTP response shapes
//! - [`watcher`] - the background loop that keeps the above current
//! - [`schedule`] - cron-trigger polling loop
//! - [`baseline_service`] - rolling duration baselines and anomaly detection
//! - [`repository`] - durable storage contracts (in-memory and SQLite)
//! - [`http`] - the axum HTTP surface
//! - [`app`] - process bootstrap wiring every component together
//!
//! ## Command-Line Interface
//!
//! ```bash
//! # Start the gateway
//! waygate serve --bind-addr 0.0.0.0:8080
//! ```
//!
//! ## Configuration
//!
//! Waygate can be configured via:
//! - Configuration file (`waygate.yaml`)
//! - Environment variables (prefix: `WAYGATE__`)
//! - Command-line arguments
//!
//! See [`config::WaygateConfig`] for available options.

pub mod app;
pub mod baseline_service;
pub mod blast_radius;
pub mod cmd;
pub mod config;
pub mod discovery;
pub mod endpoints;
pub mod events;
pub mod execution;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod repository;
pub mod schedule;
pub mod versioning;
pub mod watcher;
pub mod yaml;
