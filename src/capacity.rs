//! Capacity guard
//!
//! Decides whether a fleet-wide or template-wide droplet cap has been
//! reached. Two sources are consulted: the host's local node registry and a
//! freshly fetched remote droplet snapshot. The API may not yet reflect
//! droplets the host just created, and the registry may not yet reflect
//! droplets created outside this controller, so a cap counts as reached when
//! **either** source alone reaches it. This biases toward under-provisioning;
//! a missed cycle is cheap, a runaway fleet is not.
//!
//! Only droplets in the new or active lifecycle phase count toward a cap.

use crate::api::Droplet;
use crate::config::{FleetConfig, TemplateConfig};
use crate::name;
use crate::registry::NodeRegistry;
use tracing::debug;

/// Per-decision view over the fleet config and the host registry.
pub struct CapacityGuard<'a> {
    fleet: &'a FleetConfig,
    registry: &'a dyn NodeRegistry,
}

impl<'a> CapacityGuard<'a> {
    /// Create a guard for one provisioning decision.
    pub fn new(fleet: &'a FleetConfig, registry: &'a dyn NodeRegistry) -> Self {
        Self { fleet, registry }
    }

    /// Registered local nodes belonging to this fleet.
    pub fn local_fleet_count(&self) -> usize {
        self.registry
            .node_names()
            .iter()
            .filter(|n| name::is_instance_of_fleet(n, &self.fleet.name))
            .count()
    }

    /// Registered local nodes belonging to this fleet and template.
    pub fn local_template_count(&self, template: &TemplateConfig) -> usize {
        self.registry
            .node_names()
            .iter()
            .filter(|n| name::is_instance_of_template(n, &self.fleet.name, &template.name))
            .count()
    }

    /// New-or-active droplets in the snapshot belonging to this fleet.
    pub fn remote_fleet_count(&self, snapshot: &[Droplet]) -> usize {
        snapshot
            .iter()
            .filter(|d| d.status.is_new() || d.status.is_active())
            .filter(|d| name::is_instance_of_fleet(&d.name, &self.fleet.name))
            .count()
    }

    /// New-or-active droplets in the snapshot belonging to this fleet and
    /// template.
    pub fn remote_template_count(&self, template: &TemplateConfig, snapshot: &[Droplet]) -> usize {
        snapshot
            .iter()
            .filter(|d| d.status.is_new() || d.status.is_active())
            .filter(|d| name::is_instance_of_template(&d.name, &self.fleet.name, &template.name))
            .count()
    }

    /// The cap actually enforced fleet-wide: the smaller of the fleet cap and
    /// the sum of all template caps, where 0 means unbounded on either side
    /// (any single template cap of 0 makes the sum unbounded). `None` means
    /// no bound at all.
    pub fn effective_fleet_cap(&self) -> Option<u64> {
        let fleet_cap = match self.fleet.instance_cap {
            0 => None,
            cap => Some(u64::from(cap)),
        };
        let template_sum = self.template_cap_sum();
        match (fleet_cap, template_sum) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn template_cap_sum(&self) -> Option<u64> {
        let mut sum: u64 = 0;
        for template in &self.fleet.templates {
            if template.instance_cap == 0 {
                return None;
            }
            sum += u64::from(template.instance_cap);
        }
        Some(sum)
    }

    /// Fleet cap check against the local registry only.
    pub fn is_fleet_cap_reached_local(&self) -> bool {
        let Some(cap) = self.effective_fleet_cap() else {
            return false;
        };
        let count = self.local_fleet_count() as u64;
        debug!(
            "fleet '{}' local cap check {}/{}",
            self.fleet.name, count, cap
        );
        count >= cap
    }

    /// Fleet cap check against both the local registry and the snapshot.
    pub fn is_fleet_cap_reached(&self, snapshot: &[Droplet]) -> bool {
        if self.is_fleet_cap_reached_local() {
            return true;
        }
        let Some(cap) = self.effective_fleet_cap() else {
            return false;
        };
        let count = self.remote_fleet_count(snapshot) as u64;
        debug!(
            "fleet '{}' remote cap check {}/{}",
            self.fleet.name, count, cap
        );
        count >= cap
    }

    /// Template cap check against the local registry only.
    pub fn is_template_cap_reached_local(&self, template: &TemplateConfig) -> bool {
        if template.instance_cap == 0 {
            return false;
        }
        let count = self.local_template_count(template);
        debug!(
            "template '{}' local cap check {}/{}",
            template.name, count, template.instance_cap
        );
        count >= template.instance_cap as usize
    }

    /// Template cap check against both the local registry and the snapshot.
    pub fn is_template_cap_reached(
        &self,
        template: &TemplateConfig,
        snapshot: &[Droplet],
    ) -> bool {
        if self.is_template_cap_reached_local(template) {
            return true;
        }
        if template.instance_cap == 0 {
            return false;
        }
        let count = self.remote_template_count(template, snapshot);
        debug!(
            "template '{}' remote cap check {}/{}",
            template.name, count, template.instance_cap
        );
        count >= template.instance_cap as usize
    }
}
