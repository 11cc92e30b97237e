//! Guard Core Library
//!
//! Orchestrates mesh VPN gateway machines ("guards") in a public cloud:
//! network substrate, peering with workload networks and route propagation.
//! There is no local state. Every guard is rediscovered from the tags on its
//! live cloud resources.

pub mod azure;
pub mod cloud_init;
pub mod config;
pub mod discovery;
pub mod error;
pub mod memory;
pub mod model;
pub mod network;
pub mod peering;
pub mod provider;
pub mod provisioner;
pub mod resource;
pub mod retry;
pub mod tags;
pub mod wireguard;

pub use azure::AzureCli;
pub use config::GuardConfig;
pub use discovery::Discovery;
pub use error::{Error, PermanentReason, Result};
pub use memory::MemoryCloud;
pub use model::*;
pub use network::NetworkOrchestrator;
pub use peering::{peer_request, PeeringManager};
pub use provider::{GuardProvider, MachineProvider};
pub use provisioner::GuardProvisioner;
pub use retry::RetryPolicy;
pub use tags::TagScheme;
pub use wireguard::WireGuardConf;
