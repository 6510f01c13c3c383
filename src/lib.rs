//! Corral - control plane for a fleet of autonomous task-executing agents.
//!
//! The crate hosts the agent lifecycle manager, the task scheduler (DAG
//! dependency resolution plus a multi-strategy priority queue), the
//! worker-side executor with retry and timeout, the event bus binding
//! them together, and webhook fan-out with signed deliveries.

pub mod api;
pub mod domain;
pub mod infrastructure;
pub mod orchestrator;
pub mod services;

pub use domain::models::Config;
pub use infrastructure::config::ConfigLoader;
pub use infrastructure::database::DatabaseConnection;
pub use orchestrator::Orchestrator;
