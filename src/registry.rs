//! Host node registry collaborator
//!
//! The scheduler host owns the authoritative list of registered agent nodes.
//! The provisioning core only needs three things from it: the display names
//! of current nodes (for local cap counts), registration of a freshly created
//! node, and removal on teardown. [`InMemoryRegistry`] is a self-contained
//! implementation for embedders and tests.

use crate::api::Droplet;
use crate::config::{FleetConfig, TemplateConfig};
use std::collections::HashMap;
use std::sync::RwLock;

/// An agent node created from a droplet, as registered with the host.
#[derive(Debug, Clone)]
pub struct FleetNode {
    /// Node display name, equal to the droplet name
    pub name: String,

    /// Id of the backing droplet
    pub droplet_id: u64,

    /// Owning fleet
    pub fleet: String,

    /// Template the node was created from
    pub template: String,

    /// Address to connect to, per the fleet's networking preference;
    /// `None` until DigitalOcean has assigned one
    pub host: Option<String>,

    /// Login user
    pub username: String,

    /// Agent workspace path
    pub workspace_path: String,

    /// SSH port
    pub ssh_port: u16,

    /// Executors this node provides
    pub num_executors: u32,

    /// Idle minutes before the host terminates the node
    pub idle_termination_minutes: u32,

    /// Label atoms the node serves
    pub labels: String,

    /// Setup script run by the host once the node connects
    pub init_script: String,

    /// Private key used to authenticate the SSH session
    pub private_key: String,
}

impl FleetNode {
    /// Build the node handed to the host registry from a created droplet and
    /// the template it was provisioned from.
    pub fn from_droplet(fleet: &FleetConfig, template: &TemplateConfig, droplet: &Droplet) -> Self {
        let host = if fleet.use_private_networking {
            droplet.private_ip()
        } else {
            droplet.public_ip()
        };
        Self {
            name: droplet.name.clone(),
            droplet_id: droplet.id,
            fleet: fleet.name.clone(),
            template: template.name.clone(),
            host: host.map(str::to_string),
            username: template.username.clone(),
            workspace_path: template.workspace_path.clone(),
            ssh_port: template.ssh_port,
            num_executors: template.num_executors,
            idle_termination_minutes: template.idle_termination_minutes,
            labels: template.labels.clone(),
            init_script: template.init_script.clone(),
            private_key: fleet.private_key.clone(),
        }
    }
}

/// Host-side node registry.
///
/// Writers are serialized by the provisioning mutex; readers may observe a
/// registry snapshot concurrently with a writer.
pub trait NodeRegistry: Send + Sync {
    /// Display names of all currently registered nodes.
    fn node_names(&self) -> Vec<String>;

    /// Register a newly created node.
    fn register(&self, node: FleetNode);

    /// Remove a node by name, returning it if present.
    fn remove(&self, name: &str) -> Option<FleetNode>;
}

/// Map-backed registry for embedders without a host of their own, and tests.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    nodes: RwLock<HashMap<String, FleetNode>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a registered node by name.
    pub fn get(&self, name: &str) -> Option<FleetNode> {
        self.nodes.read().unwrap().get(name).cloned()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeRegistry for InMemoryRegistry {
    fn node_names(&self) -> Vec<String> {
        self.nodes.read().unwrap().keys().cloned().collect()
    }

    fn register(&self, node: FleetNode) {
        self.nodes.write().unwrap().insert(node.name.clone(), node);
    }

    fn remove(&self, name: &str) -> Option<FleetNode> {
        self.nodes.write().unwrap().remove(name)
    }
}
