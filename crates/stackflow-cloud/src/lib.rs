//! StackFlow Cloud Execution
//!
//! Runs compiled provisioning plans against a control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  stack CLI                       │
//! │            (stack plan / simulate)               │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ProvisioningPlan
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Executor (bounded parallel, retries)    │   │
//! │  │  trait ControlPlane { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Reports     │  │  State Mgmt  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   simulated   │
//! │ control plane │
//! └───────────────┘
//! ```

pub mod error;
pub mod executor;
pub mod provider;
pub mod report;
pub mod simulated;
pub mod state;

// Re-exports
pub use error::{CloudError, Result};
pub use executor::{Executor, ExecutorConfig, idempotency_token, substitute};
pub use provider::{Availability, ControlPlane, CreateRequest, Created, Description, RetryConfig};
pub use report::{ApplyReport, ApplySummary, NodeReport, TeardownReport};
pub use simulated::SimulatedControlPlane;
pub use state::{PlanState, ResourceState, StateExistenceCheck, StateLock, StateManager};
