//! kubesim-cluster — node lifecycle outside the state lock.
//!
//! # Architecture
//!
//! ```text
//! ClusterController
//!   ├── ClusterState::add_node / remove_node   (authoritative)
//!   └── NodeProvisioner::provision / destroy    (afterwards, unlocked)
//!         ├── InProcessProvisioner
//!         │     └── SimulatedAgent task per node
//!         │           └── heartbeat(usage, pod_health) every interval
//!         └── ExternalProvisioner (nodes report over the API)
//! ```

pub mod agent;
pub mod controller;
pub mod provisioner;

pub use agent::{SimulatedAgent, UsageModel};
pub use controller::ClusterController;
pub use provisioner::{ExternalProvisioner, InProcessProvisioner, NodeProvisioner};
