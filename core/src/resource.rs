//! Provider-neutral view of the cloud resources a guard owns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource tags, kept sorted so equality and output are stable
pub type Tags = BTreeMap<String, String>;

/// Kind of cloud resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Boundary,
    Firewall,
    Network,
    PublicIp,
    Interface,
    RouteTable,
    Machine,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Boundary,
        ResourceKind::Firewall,
        ResourceKind::Network,
        ResourceKind::PublicIp,
        ResourceKind::Interface,
        ResourceKind::RouteTable,
        ResourceKind::Machine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Boundary => "boundary",
            ResourceKind::Firewall => "firewall",
            ResourceKind::Network => "network",
            ResourceKind::PublicIp => "public_ip",
            ResourceKind::Interface => "interface",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::Machine => "machine",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning state reported by the cloud for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProvisioningState {
    Succeeded,
    Creating,
    Updating,
    Deleting,
    Failed,
    #[default]
    Unknown,
}

impl ProvisioningState {
    pub fn from_cloud_state(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "succeeded" => ProvisioningState::Succeeded,
            "creating" | "accepted" => ProvisioningState::Creating,
            "updating" => ProvisioningState::Updating,
            "deleting" => ProvisioningState::Deleting,
            "failed" | "canceled" => ProvisioningState::Failed,
            _ => ProvisioningState::Unknown,
        }
    }
}

/// Power state of a compute instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Running,
    Starting,
    Stopped,
    Deallocated,
    Creating,
    Failed,
    #[default]
    Unknown,
}

impl MachineState {
    /// Parse power states such as "VM running" or "PowerState/deallocated"
    pub fn from_power_state(state: &str) -> Self {
        let state = state.trim().to_lowercase();
        let state = state
            .rsplit(|c: char| c == '/' || c == ' ')
            .next()
            .unwrap_or_default()
            .to_string();
        match state.as_str() {
            "running" => MachineState::Running,
            "starting" => MachineState::Starting,
            "stopped" | "stopping" => MachineState::Stopped,
            "deallocated" | "deallocating" => MachineState::Deallocated,
            "creating" => MachineState::Creating,
            "failed" => MachineState::Failed,
            _ => MachineState::Unknown,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MachineState::Running => "Running",
            MachineState::Starting => "Starting",
            MachineState::Stopped => "Stopped",
            MachineState::Deallocated => "Deallocated",
            MachineState::Creating => "Creating",
            MachineState::Failed => "Failed",
            MachineState::Unknown => "Unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, MachineState::Running)
    }
}

/// Traffic protocol of a firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Udp,
    Tcp,
    Any,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "Udp",
            Protocol::Tcp => "Tcp",
            Protocol::Any => "*",
        }
    }

    pub fn from_cloud(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "udp" => Protocol::Udp,
            "tcp" => Protocol::Tcp,
            _ => Protocol::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }

    pub fn from_cloud(value: &str) -> Self {
        if value.eq_ignore_ascii_case("outbound") {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

/// An allow rule inside a firewall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub priority: u16,
    pub protocol: Protocol,
    /// Destination port, or `None` for any port
    pub dest_port: Option<u16>,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundarySpec {
    pub provisioning_state: ProvisioningState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallSpec {
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Assigned by the provider on creation
    pub id: String,
    pub name: String,
    pub address_prefix: String,
    pub firewall_id: Option<String>,
    pub route_table_id: Option<String>,
}

/// State of one side of a network peering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeeringState {
    /// Both sides exist
    Connected,
    /// Only this side exists; waiting for the remote side
    #[default]
    Initiated,
    /// The remote side was removed
    Disconnected,
}

impl PeeringState {
    pub fn from_cloud_state(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "connected" => PeeringState::Connected,
            "disconnected" => PeeringState::Disconnected,
            _ => PeeringState::Initiated,
        }
    }
}

/// A peering link as stored on the network that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringLink {
    pub name: String,
    pub remote_network_id: String,
    pub state: PeeringState,
    pub allow_forwarded_traffic: bool,
}

impl PeeringLink {
    pub fn new(name: impl Into<String>, remote_network_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_network_id: remote_network_id.into(),
            state: PeeringState::Initiated,
            allow_forwarded_traffic: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub address_space: Vec<String>,
    pub subnets: Vec<SubnetSpec>,
    pub peerings: Vec<PeeringLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicIpSpec {
    /// Assigned by the provider; static allocation
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub subnet_id: String,
    pub public_ip_id: Option<String>,
    pub firewall_id: Option<String>,
    /// Assigned by the provider
    pub private_ip: Option<String>,
    pub ip_forwarding: bool,
}

/// A user-defined route sending a prefix to a virtual appliance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub address_prefix: String,
    pub next_hop_ip: String,
}

impl Route {
    /// Route names are derived from the prefix so re-propagation overwrites
    pub fn for_mesh_cidr(cidr: &str, next_hop_ip: &str) -> Self {
        Self {
            name: mesh_route_name(cidr),
            address_prefix: cidr.to_string(),
            next_hop_ip: next_hop_ip.to_string(),
        }
    }
}

pub const MESH_ROUTE_PREFIX: &str = "mesh-";

/// "10.200.0.0/16" -> "mesh-10-200-0-0-16"
pub fn mesh_route_name(cidr: &str) -> String {
    let slug: String = cidr
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}{}", MESH_ROUTE_PREFIX, slug)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTableSpec {
    pub routes: Vec<Route>,
    /// Subnets this table is associated with
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub size: String,
    pub interface_id: String,
    pub state: MachineState,
}

/// Kind-specific properties of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Boundary(BoundarySpec),
    Firewall(FirewallSpec),
    Network(NetworkSpec),
    PublicIp(PublicIpSpec),
    Interface(InterfaceSpec),
    RouteTable(RouteTableSpec),
    Machine(MachineSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Boundary(_) => ResourceKind::Boundary,
            ResourceSpec::Firewall(_) => ResourceKind::Firewall,
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::PublicIp(_) => ResourceKind::PublicIp,
            ResourceSpec::Interface(_) => ResourceKind::Interface,
            ResourceSpec::RouteTable(_) => ResourceKind::RouteTable,
            ResourceSpec::Machine(_) => ResourceKind::Machine,
        }
    }
}

/// A live cloud resource, as read back from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: String,
    pub name: String,
    /// Name of the isolation boundary containing the resource
    pub boundary: String,
    pub location: String,
    pub tags: Tags,
    pub spec: ResourceSpec,
}

impl CloudResource {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn as_firewall(&self) -> Option<&FirewallSpec> {
        match &self.spec {
            ResourceSpec::Firewall(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkSpec> {
        match &self.spec {
            ResourceSpec::Network(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_public_ip(&self) -> Option<&PublicIpSpec> {
        match &self.spec {
            ResourceSpec::PublicIp(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_interface(&self) -> Option<&InterfaceSpec> {
        match &self.spec {
            ResourceSpec::Interface(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_route_table(&self) -> Option<&RouteTableSpec> {
        match &self.spec {
            ResourceSpec::RouteTable(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_machine(&self) -> Option<&MachineSpec> {
        match &self.spec {
            ResourceSpec::Machine(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_boundary(&self) -> Option<&BoundarySpec> {
        match &self.spec {
            ResourceSpec::Boundary(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Tag-based selector for resource-graph queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// All pairs must match
    pub tags: Vec<(String, String)>,
    /// Empty means every kind
    pub kinds: Vec<ResourceKind>,
}

impl TagFilter {
    pub fn with_kinds(mut self, kinds: &[ResourceKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn matches(&self, kind: ResourceKind, tags: &Tags) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&kind))
            && self
                .tags
                .iter()
                .all(|(k, v)| tags.get(k).map(|t| t == v).unwrap_or(false))
    }
}

/// Last path segment of a resource id
pub fn name_from_id(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

/// Network id portion of a subnet id (".../virtualNetworks/x/subnets/y")
pub fn network_id_of_subnet(subnet_id: &str) -> Option<&str> {
    let lower = subnet_id.to_lowercase();
    lower.rfind("/subnets/").map(|idx| &subnet_id[..idx])
}

pub fn subnet_id(network_id: &str, name: &str) -> String {
    format!("{}/subnets/{}", network_id.trim_end_matches('/'), name)
}
