//! # Provisioning
//!
//! Worker lifecycle: bringing execution environments up and tearing them down.
//!
//! ## Architecture
//!
//! ```text
//! TaskOrchestrator
//!       │  WorkerLifecycle
//!       ├──────────────> WorkerLifecycleManager ──> "local"  LocalBackend
//!       │                  (name -> backend)    └─> "docker" DockerBackend
//!       │
//!       └──────────────> BusWorkerLifecycle ──> node.<id>.node.provision / .terminate
//! ```

pub mod backend;
pub mod bus_client;
pub mod docker;
pub mod local;
pub mod manager;

pub use backend::{ProvisioningBackend, WorkerLifecycle};
pub use bus_client::BusWorkerLifecycle;
pub use docker::{DockerBackend, DockerSettings};
pub use local::LocalBackend;
pub use manager::WorkerLifecycleManager;
