//! DigitalOcean API surface
//!
//! The provisioning core talks to DigitalOcean through the [`DropletApi`]
//! trait only, never a concrete client. [`DigitalOceanClient`] is the reqwest
//! implementation against the v2 REST API; tests substitute an in-memory
//! implementation.
//!
//! Droplet snapshots are fetched fresh for every provisioning decision and
//! never cached — a stale list directly causes over-provisioning.

use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// DigitalOcean v2 API base URL
pub const API_BASE: &str = "https://api.digitalocean.com/v2";

/// Page size used when listing collections
const PER_PAGE: usize = 200;

/// Droplet lifecycle phase as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropletPhase {
    /// Creation accepted, droplet still being built
    New,
    /// Droplet is up
    Active,
    /// Droplet is powered off
    Off,
    /// Droplet is archived
    Archive,
    /// Any phase this crate does not know about
    #[serde(other)]
    Unknown,
}

impl DropletPhase {
    /// Creation in progress.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }

    /// Droplet is up.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// IPv4 address entry of a droplet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkV4 {
    /// The address itself
    pub ip_address: String,

    /// "public" or "private"
    #[serde(rename = "type")]
    pub kind: String,
}

/// Network block of a droplet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Networks {
    /// IPv4 addresses
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

/// Read-only projection of a remote droplet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Droplet {
    /// Droplet id assigned by DigitalOcean
    pub id: u64,

    /// Display name
    pub name: String,

    /// Lifecycle phase
    pub status: DropletPhase,

    /// Size slug the droplet was created with
    #[serde(default)]
    pub size_slug: String,

    /// Region the droplet runs in
    #[serde(default)]
    pub region: Option<Region>,

    /// Droplet tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Assigned addresses
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    fn ip_of_kind(&self, kind: &str) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == kind)
            .map(|n| n.ip_address.as_str())
    }

    /// The droplet's public IPv4 address, if assigned yet.
    pub fn public_ip(&self) -> Option<&str> {
        self.ip_of_kind("public")
    }

    /// The droplet's private IPv4 address, if assigned yet.
    pub fn private_ip(&self) -> Option<&str> {
        self.ip_of_kind("private")
    }
}

/// An image available to the account (distribution image or snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Numeric image id
    pub id: u64,

    /// Slug, present for distribution images only
    #[serde(default)]
    pub slug: Option<String>,

    /// Human-readable name
    pub name: String,

    /// Distribution, e.g. "Debian"
    #[serde(default)]
    pub distribution: String,
}

impl Image {
    /// The identifier to pass when creating a droplet: the slug where one
    /// exists, otherwise the numeric id (snapshots and backups have no slug).
    pub fn identifier(&self) -> String {
        match &self.slug {
            Some(slug) if !slug.is_empty() => slug.clone(),
            _ => self.id.to_string(),
        }
    }
}

/// A datacenter region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Region slug, e.g. "nyc1"
    pub slug: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Whether new droplets can currently be created here
    #[serde(default)]
    pub available: bool,
}

/// A droplet size class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Size {
    /// Size slug, e.g. "s-2vcpu-4gb"
    pub slug: String,

    /// Memory in MB
    #[serde(default)]
    pub memory: u64,

    /// Virtual CPU count
    #[serde(default)]
    pub vcpus: u32,

    /// Monthly price in USD
    #[serde(default)]
    pub price_monthly: f64,
}

impl Size {
    /// Human-readable label, e.g. "s-2vcpu-4gb (4096 MB / 2 vCPU / $24/mo)".
    pub fn label(&self) -> String {
        format!(
            "{} ({} MB / {} vCPU / ${}/mo)",
            self.slug, self.memory, self.vcpus, self.price_monthly
        )
    }
}

/// An SSH key registered with the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    /// Key id
    pub id: u64,

    /// Key name
    pub name: String,

    /// Key fingerprint
    #[serde(default)]
    pub fingerprint: String,
}

/// Request body for droplet creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    /// Droplet name
    pub name: String,

    /// Region slug
    pub region: String,

    /// Size slug
    pub size: String,

    /// Image slug or numeric id
    pub image: String,

    /// Ids of SSH keys to install
    pub ssh_keys: Vec<u64>,

    /// Attach a private network interface
    pub private_networking: bool,

    /// Install the monitoring agent
    pub monitoring: bool,

    /// Droplet tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Cloud-init user data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// Remote API collaborator for droplet lifecycle and account listings.
#[async_trait]
pub trait DropletApi: Send + Sync {
    /// List all droplets visible to the account.
    async fn list_droplets(&self) -> Result<Vec<Droplet>>;

    /// Create a droplet and return it with its assigned id.
    async fn create_droplet(&self, request: &CreateDropletRequest) -> Result<Droplet>;

    /// Fetch one droplet by id.
    async fn get_droplet(&self, id: u64) -> Result<Droplet>;

    /// Destroy a droplet by id.
    async fn destroy_droplet(&self, id: u64) -> Result<()>;

    /// List images available to the account.
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// List datacenter regions.
    async fn list_regions(&self) -> Result<Vec<Region>>;

    /// List droplet size classes.
    async fn list_sizes(&self) -> Result<Vec<Size>>;

    /// List SSH keys registered with the account.
    async fn list_keys(&self) -> Result<Vec<SshKey>>;
}

/// Best-effort asynchronous droplet destruction, used on node teardown.
///
/// Errors are logged, not surfaced; the droplet will be retried by the next
/// teardown or cleaned up manually.
pub fn destroy_droplet_async(api: Arc<dyn DropletApi>, id: u64) {
    tokio::spawn(async move {
        if let Err(e) = api.destroy_droplet(id).await {
            warn!("Failed to destroy droplet {}: {}", id, e);
        } else {
            debug!("Droplet {} destruction initiated", id);
        }
    });
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DropletsPage {
    droplets: Vec<Droplet>,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct ImagesPage {
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct RegionsPage {
    regions: Vec<Region>,
}

#[derive(Debug, Deserialize)]
struct SizesPage {
    sizes: Vec<Size>,
}

#[derive(Debug, Deserialize)]
struct KeysPage {
    ssh_keys: Vec<SshKey>,
}

/// Reqwest-based client for the DigitalOcean v2 API.
pub struct DigitalOceanClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl DigitalOceanClient {
    /// Create a client for the given API token.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            token: token.into(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the client at a different base URL (for test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();
        Err(ProvisionError::api(status.as_u16(), message))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_paged<P, T>(&self, path: &str, extract: fn(P) -> Vec<T>) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let path = format!("{path}?page={page}&per_page={PER_PAGE}");
            let batch = extract(self.get_json(&path).await?);
            let batch_len = batch.len();
            all.extend(batch);
            if batch_len < PER_PAGE {
                return Ok(all);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl DropletApi for DigitalOceanClient {
    async fn list_droplets(&self) -> Result<Vec<Droplet>> {
        self.list_paged("/droplets", |p: DropletsPage| p.droplets)
            .await
    }

    async fn create_droplet(&self, request: &CreateDropletRequest) -> Result<Droplet> {
        let url = format!("{}/droplets", self.base_url);
        debug!("POST {} name={} size={}", url, request.name, request.size);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let envelope: DropletEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.droplet)
    }

    async fn get_droplet(&self, id: u64) -> Result<Droplet> {
        let url = format!("{}/droplets/{}", self.base_url, id);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisionError::DropletNotFound(id));
        }
        let envelope: DropletEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.droplet)
    }

    async fn destroy_droplet(&self, id: u64) -> Result<()> {
        let url = format!("{}/droplets/{}", self.base_url, id);
        debug!("DELETE {}", url);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        self.list_paged("/images", |p: ImagesPage| p.images).await
    }

    async fn list_regions(&self) -> Result<Vec<Region>> {
        self.list_paged("/regions", |p: RegionsPage| p.regions).await
    }

    async fn list_sizes(&self) -> Result<Vec<Size>> {
        self.list_paged("/sizes", |p: SizesPage| p.sizes).await
    }

    async fn list_keys(&self) -> Result<Vec<SshKey>> {
        self.list_paged("/account/keys", |p: KeysPage| p.ssh_keys)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_droplet_phase_parsing() {
        let phase: DropletPhase = serde_json::from_str("\"new\"").unwrap();
        assert!(phase.is_new());
        let phase: DropletPhase = serde_json::from_str("\"active\"").unwrap();
        assert!(phase.is_active());
        let phase: DropletPhase = serde_json::from_str("\"migrating\"").unwrap();
        assert_eq!(phase, DropletPhase::Unknown);
    }

    #[test]
    fn test_droplet_deserialization() {
        let json = r#"{
            "id": 3164444,
            "name": "fleet1-small-abc123",
            "status": "active",
            "size_slug": "s-1vcpu-1gb",
            "region": { "slug": "nyc1", "name": "New York 1", "available": true },
            "tags": ["ci"],
            "networks": { "v4": [
                { "ip_address": "10.0.0.5", "type": "private" },
                { "ip_address": "203.0.113.7", "type": "public" }
            ]}
        }"#;
        let droplet: Droplet = serde_json::from_str(json).unwrap();
        assert_eq!(droplet.id, 3164444);
        assert_eq!(droplet.public_ip(), Some("203.0.113.7"));
        assert_eq!(droplet.private_ip(), Some("10.0.0.5"));
        assert!(droplet.status.is_active());
    }

    #[test]
    fn test_image_identifier_prefers_slug() {
        let distro = Image {
            id: 1,
            slug: Some("debian-12-x64".to_string()),
            name: "Debian 12".to_string(),
            distribution: "Debian".to_string(),
        };
        assert_eq!(distro.identifier(), "debian-12-x64");

        let snapshot = Image {
            id: 12345678,
            slug: None,
            name: "builder snapshot".to_string(),
            distribution: String::new(),
        };
        assert_eq!(snapshot.identifier(), "12345678");
    }

    #[test]
    fn test_create_request_omits_empty_optionals() {
        let request = CreateDropletRequest {
            name: "n".to_string(),
            region: "nyc1".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            image: "debian-12-x64".to_string(),
            ssh_keys: vec![7],
            private_networking: false,
            monitoring: false,
            tags: vec![],
            user_data: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tags").is_none());
        assert!(json.get("user_data").is_none());
        assert_eq!(json["ssh_keys"][0], 7);
    }
}
