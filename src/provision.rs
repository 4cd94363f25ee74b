//! Provisioning controller
//!
//! The orchestrator for one fleet. `provision` runs the admission loop under
//! the fleet's provisioning mutex: fetch a fresh droplet snapshot, stop if a
//! cap is reached, pick the best eligible template still under its cap,
//! generate a droplet name and hand creation off to an async task, repeating
//! until the requested workload is covered.
//!
//! Droplets can be provisioned very fast and in parallel; without mutual
//! exclusion two decisions could both observe one free slot and jointly
//! overshoot the cap. The mutex serializes every admission decision, and each
//! creation task re-acquires it to re-check the caps against a fresh snapshot
//! right before the create call (the reserving step). A task that loses that
//! re-check resolves to no node; the caller already counted it as planned,
//! which is an accepted over-count of the plan versus actual creation.
//!
//! Demand accounting rounds up to whole templates: the last iteration may
//! subtract more executors than remain outstanding.

use crate::api::{CreateDropletRequest, Droplet, DropletApi};
use crate::capacity::CapacityGuard;
use crate::config::{FleetConfig, TemplateConfig};
use crate::connect::Connector;
use crate::error::{ProvisionError, Result};
use crate::name;
use crate::registry::{FleetNode, NodeRegistry};
use crate::selector::{self, Label};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A creation in progress, returned before the remote create call completes.
#[derive(Debug)]
pub struct PlannedInstance {
    /// Owning fleet
    pub fleet: String,

    /// Template the droplet is created from
    pub template: String,

    /// Generated droplet name
    pub droplet_name: String,

    /// Executors this instance will provide once connected
    pub num_executors: u32,

    handle: JoinHandle<Result<Option<FleetNode>>>,
}

impl PlannedInstance {
    /// Wait for the creation task.
    ///
    /// Resolves to the connected node, to `None` when the pre-create cap
    /// re-check cancelled the creation, or to the error that ended the
    /// template's size chain.
    pub async fn resolve(self) -> Result<Option<FleetNode>> {
        self.handle
            .await
            .map_err(|e| ProvisionError::task(e.to_string()))?
    }
}

/// Serialized provisioning for one fleet.
pub struct ProvisioningController {
    fleet: Arc<FleetConfig>,
    api: Arc<dyn DropletApi>,
    registry: Arc<dyn NodeRegistry>,
    connector: Arc<dyn Connector>,
    lock: Arc<Mutex<()>>,
}

impl ProvisioningController {
    /// Create a controller for a validated fleet configuration.
    pub fn new(
        fleet: FleetConfig,
        api: Arc<dyn DropletApi>,
        registry: Arc<dyn NodeRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        fleet.validate()?;
        Ok(Self {
            fleet: Arc::new(fleet),
            api,
            registry,
            connector,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// The fleet this controller provisions for.
    pub fn fleet(&self) -> &FleetConfig {
        &self.fleet
    }

    /// Cheap admission predicate: whether this fleet could provision for the
    /// label at all, judged from eligibility and local counts only. Makes no
    /// remote call.
    pub async fn can_provision(&self, label: Option<&Label>) -> bool {
        let _guard = self.lock.lock().await;
        let guard = CapacityGuard::new(&self.fleet, self.registry.as_ref());

        let ranked = selector::eligible_ranked(&self.fleet.templates, label);
        let template =
            selector::pick_first_under_cap(&ranked, |t| !guard.is_template_cap_reached_local(t));
        if template.is_none() {
            info!(
                "No template can provision for label {:?}: none eligible or all at their cap",
                label.map(Label::name)
            );
            return false;
        }

        if guard.is_fleet_cap_reached_local() {
            info!(
                "Fleet cap reached, not provisioning for label {:?}",
                label.map(Label::name)
            );
            return false;
        }

        true
    }

    /// Provision capacity for a label.
    ///
    /// Returns one [`PlannedInstance`] per droplet whose creation was
    /// admitted. A snapshot fetch failure ends the loop early with whatever
    /// was planned so far; the caller retries on its own cadence.
    pub async fn provision(
        &self,
        label: Option<&Label>,
        excess_workload: u32,
    ) -> Vec<PlannedInstance> {
        let _guard = self.lock.lock().await;

        info!(
            "Provisioning for label {:?}; excess workload: {}",
            label.map(Label::name),
            excess_workload
        );

        let mut planned = Vec::new();
        // Signed on purpose: an iteration may round demand below zero.
        let mut remaining = i64::from(excess_workload);

        while remaining > 0 {
            let snapshot = match self.api.list_droplets().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Failed to fetch droplet snapshot: {}", e);
                    break;
                }
            };

            let guard = CapacityGuard::new(&self.fleet, self.registry.as_ref());
            if guard.is_fleet_cap_reached(&snapshot) {
                info!("Instance cap reached, not provisioning");
                break;
            }

            let ranked = selector::eligible_ranked(&self.fleet.templates, label);
            let Some(template) = selector::pick_first_under_cap(&ranked, |t| {
                !guard.is_template_cap_reached(t, &snapshot)
            }) else {
                info!(
                    "No eligible template below its cap for label {:?}",
                    label.map(Label::name)
                );
                break;
            };

            let droplet_name = name::generate(&self.fleet.name, &template.name);
            let Some(template_index) = self
                .fleet
                .templates
                .iter()
                .position(|t| std::ptr::eq(t, template))
            else {
                break; // template always comes from this very list
            };

            debug!(
                "Planning droplet {} from template '{}'",
                droplet_name, template.name
            );
            let handle = self.spawn_creation(template_index, droplet_name.clone());
            planned.push(PlannedInstance {
                fleet: self.fleet.name.clone(),
                template: template.name.clone(),
                droplet_name,
                num_executors: template.num_executors,
                handle,
            });

            remaining -= i64::from(template.num_executors);
        }

        info!("Provisioning {} droplet nodes", planned.len());
        planned
    }

    fn spawn_creation(
        &self,
        template_index: usize,
        droplet_name: String,
    ) -> JoinHandle<Result<Option<FleetNode>>> {
        let fleet = Arc::clone(&self.fleet);
        let api = Arc::clone(&self.api);
        let registry = Arc::clone(&self.registry);
        let connector = Arc::clone(&self.connector);
        let lock = Arc::clone(&self.lock);

        tokio::spawn(async move {
            let template = &fleet.templates[template_index];

            // Reserving step: everything up to and including registration
            // happens under the provisioning mutex, so concurrent cap checks
            // never miss this node.
            let node = {
                let _guard = lock.lock().await;

                let snapshot = api.list_droplets().await?;
                let guard = CapacityGuard::new(&fleet, registry.as_ref());
                if guard.is_fleet_cap_reached(&snapshot)
                    || guard.is_template_cap_reached(template, &snapshot)
                {
                    info!(
                        "Instance cap reached while reserving {}, not creating",
                        droplet_name
                    );
                    return Ok(None);
                }

                let droplet =
                    match create_with_fallbacks(api.as_ref(), &fleet, template, &droplet_name)
                        .await
                    {
                        Ok(droplet) => droplet,
                        Err(e) => {
                            // The whole size chain failed; rank this template
                            // last until the cool-down passes.
                            template.health.mark_unhealthy();
                            return Err(e);
                        }
                    };

                let node = FleetNode::from_droplet(&fleet, template, &droplet);
                registry.register(node.clone());
                info!(
                    "Registered node {} (droplet {})",
                    node.name, node.droplet_id
                );
                node
            };

            // Slow connection handshakes must not serialize other
            // provisioning decisions.
            connector.connect(&node).await?;
            Ok(Some(node))
        })
    }
}

/// Walk the template's size chain and create the droplet with the first size
/// that works.
///
/// Unhealthy sizes are skipped, except the last entry of the chain, which is
/// always attempted — historical errors must never block provisioning
/// entirely. A failed attempt marks its size unhealthy and advances; failure
/// of the last entry propagates.
async fn create_with_fallbacks(
    api: &dyn DropletApi,
    fleet: &FleetConfig,
    template: &TemplateConfig,
    droplet_name: &str,
) -> Result<Droplet> {
    let chain = template.size_chain();
    let mut index = 0;

    loop {
        while index < chain.len() - 1 && !chain[index].health.is_healthy() {
            debug!(
                "Skipping unhealthy size {} for {}",
                chain[index].size_id, droplet_name
            );
            index += 1;
        }
        let size = chain[index];

        info!(
            "Creating droplet {} (image: {}, region: {}, size: {})",
            droplet_name, template.image_id, template.region_id, size.size_id
        );
        let user_data = Some(template.user_data.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let request = CreateDropletRequest {
            name: droplet_name.to_string(),
            region: template.region_id.clone(),
            size: size.size_id.clone(),
            image: template.image_id.clone(),
            ssh_keys: vec![fleet.ssh_key_id],
            private_networking: fleet.use_private_networking,
            monitoring: template.install_monitoring,
            tags: template.tag_list(),
            user_data,
        };

        match api.create_droplet(&request).await {
            Ok(droplet) => return Ok(droplet),
            Err(e) => {
                warn!(
                    "Droplet create failed for {} with size {}: {}",
                    droplet_name, size.size_id, e
                );
                size.health.mark_unhealthy();
                if index + 1 >= chain.len() {
                    return Err(e);
                }
                index += 1;
            }
        }
    }
}
