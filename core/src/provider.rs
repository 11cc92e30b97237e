//! Capability traits the orchestration layer is written against
//!
//! `GuardProvider` covers network, discovery and peering primitives;
//! `MachineProvider` is the generic compute lifecycle. Components depend only
//! on these traits, never on a concrete backend.
//!
//! Conventions every implementation follows:
//! - lookups return `Ok(None)` for an absent resource,
//! - deletes return `Error::NotFound` for an absent target,
//! - failures are classified into `Transient` and `Permanent` so the retry
//!   layer can decide what to repeat.

use crate::resource::{
    CloudResource, FirewallRule, MachineState, PeeringLink, ResourceKind, ResourceSpec, Route,
    SubnetSpec, TagFilter, Tags,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait GuardProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // ==================== Isolation boundary ====================

    async fn get_boundary(&self, name: &str) -> Result<Option<CloudResource>>;

    async fn create_boundary(
        &self,
        name: &str,
        location: &str,
        tags: &Tags,
    ) -> Result<CloudResource>;

    /// Cascading delete of the boundary and everything inside it
    async fn delete_boundary(&self, name: &str) -> Result<()>;

    // ==================== Generic resources ====================

    async fn get_resource(
        &self,
        boundary: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<CloudResource>>;

    async fn get_resource_by_id(&self, id: &str) -> Result<Option<CloudResource>>;

    /// Create a resource inside `boundary`; provider-assigned fields of `spec`
    /// (ids, addresses) are filled in on the returned resource
    async fn create_resource(
        &self,
        boundary: &str,
        name: &str,
        location: &str,
        tags: &Tags,
        spec: ResourceSpec,
    ) -> Result<CloudResource>;

    // ==================== Subnets ====================

    async fn get_subnet(&self, network_id: &str, name: &str) -> Result<Option<SubnetSpec>>;

    async fn create_subnet(&self, network_id: &str, subnet: &SubnetSpec) -> Result<SubnetSpec>;

    // ==================== Firewall and interface ====================

    async fn list_firewall_rules(&self, firewall_id: &str) -> Result<Vec<FirewallRule>>;

    /// Create or replace the rule with the same name
    async fn put_firewall_rule(&self, firewall_id: &str, rule: &FirewallRule) -> Result<()>;

    async fn set_ip_forwarding(&self, interface_id: &str, enabled: bool) -> Result<()>;

    // ==================== Discovery ====================

    /// Resource-graph scan: every resource matching the filter, any boundary
    async fn query_tagged(&self, filter: &TagFilter) -> Result<Vec<CloudResource>>;

    // ==================== Peering and routing ====================

    async fn list_peerings(&self, network_id: &str) -> Result<Vec<PeeringLink>>;

    /// Create or update the link named `link.name` on `network_id`
    async fn upsert_peering(&self, network_id: &str, link: &PeeringLink) -> Result<PeeringLink>;

    async fn delete_peering(&self, network_id: &str, name: &str) -> Result<()>;

    /// Create or replace the route with the same name
    async fn upsert_route(&self, route_table_id: &str, route: &Route) -> Result<()>;

    async fn delete_route(&self, route_table_id: &str, name: &str) -> Result<()>;

    async fn associate_route_table(&self, subnet_id: &str, route_table_id: &str) -> Result<()>;

    async fn dissociate_route_table(&self, subnet_id: &str) -> Result<()>;
}

/// Everything needed to boot one compute instance
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub name: String,
    pub boundary: String,
    pub location: String,
    pub size: String,
    pub image: String,
    pub admin_username: String,
    pub ssh_public_key: Option<String>,
    /// Pre-created interface the instance attaches to
    pub interface_id: String,
    /// cloud-init document, plain text
    pub user_data: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub boundary: String,
    pub location: String,
    pub state: MachineState,
    pub tags: Tags,
}

#[async_trait]
pub trait MachineProvider: Send + Sync {
    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo>;

    async fn delete_server(&self, boundary: &str, name: &str) -> Result<()>;

    async fn list_servers(&self, boundary: &str) -> Result<Vec<ServerInfo>>;
}
