//! # Droplet Fleet
//!
//! Capacity-bounded provisioning of DigitalOcean droplet agents.
//!
//! ## Architecture
//!
//! ```text
//! ProvisioningController (per fleet, one mutex)
//! ├── TemplateSelector    — eligibility + deterministic rank
//! ├── CapacityGuard       — local registry OR remote snapshot caps
//! ├── size chain          — primary size + fallbacks, 1h health markers
//! └── creation task  ────→ DropletApi (reqwest) → Connector → NodeRegistry
//! ```
//!
//! Every provisioning decision runs under the fleet's mutex against a fresh
//! droplet snapshot, and each async creation task re-checks the caps under the
//! same mutex right before the create call. The result is a hard invariant:
//! concurrent provisioning never exceeds the effective fleet or template cap,
//! at the price of occasionally planning an instance that is then cancelled.
//!
//! The crate is host-agnostic: the scheduler embedding it supplies a
//! [`NodeRegistry`] and a [`Connector`], or uses the bundled
//! [`InMemoryRegistry`] and [`TcpConnector`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod capacity;
pub mod config;
pub mod connect;
pub mod error;
pub mod name;
pub mod provision;
pub mod registry;
pub mod selector;

// ============================================================================
// Public exports - Provisioning API
// ============================================================================

// Controller and planned-instance handles
pub use provision::{PlannedInstance, ProvisioningController};

// Template selection
pub use selector::{Label, HIGH_CAPACITY_PREFIX, PREFERRED_TEMPLATES};

// Capacity accounting
pub use capacity::CapacityGuard;

// ============================================================================
// Public exports - Configuration
// ============================================================================

pub use config::{
    FleetConfig, HealthMarker, SizeConfig, TemplateConfig, UNHEALTHY_COOLDOWN_SECS,
};

// ============================================================================
// Public exports - Collaborators and infrastructure
// ============================================================================

// Remote API
pub use api::{
    destroy_droplet_async, CreateDropletRequest, DigitalOceanClient, Droplet, DropletApi,
    DropletPhase,
};

// Host-side registry and connectivity
pub use connect::{Connector, TcpConnector};
pub use registry::{FleetNode, InMemoryRegistry, NodeRegistry};

// Error handling
pub use error::{ProvisionError, Result};
