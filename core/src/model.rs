//! Domain model types for guards

use crate::resource::{
    name_from_id, Direction, FirewallRule, MachineState, PeeringState, Protocol, Route, Tags,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Stable identity of a guard; the join key between all of its resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuardId(String);

impl GuardId {
    /// Leaves room for the longest derived resource name suffix
    pub const MAX_LEN: usize = 40;

    pub fn parse(value: &str) -> Result<Self> {
        validate_guard_id(value).map_err(Error::validation)?;
        Ok(GuardId(value.to_string()))
    }

    /// Time-derived id: `guard-<yyyymmddHHMMSS>-<4 hex>`
    ///
    /// Two ids generated in the same second collide with probability 1/65536.
    pub fn generate() -> Self {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        GuardId(format!("guard-{}-{}", timestamp, &suffix[..4]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn names(&self) -> ResourceNames {
        ResourceNames::for_guard(self)
    }
}

impl fmt::Display for GuardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GuardId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        GuardId::parse(s)
    }
}

impl TryFrom<String> for GuardId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        GuardId::parse(&value)
    }
}

impl From<GuardId> for String {
    fn from(id: GuardId) -> Self {
        id.0
    }
}

/// Validates a guard id: lowercase letters, digits and hyphens only
pub fn validate_guard_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("Guard id cannot be empty".to_string());
    }

    let re = regex::Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").map_err(|e| e.to_string())?;
    if !re.is_match(id) {
        return Err(format!(
            "Guard id '{}' must contain only lowercase letters, numbers and hyphens",
            id
        ));
    }

    if id.len() > GuardId::MAX_LEN {
        return Err(format!(
            "Guard id must be {} characters or less",
            GuardId::MAX_LEN
        ));
    }

    Ok(())
}

/// Deterministic names of every resource a guard owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub boundary: String,
    pub firewall: String,
    pub network: String,
    pub subnet: String,
    pub public_ip: String,
    pub interface: String,
    pub machine: String,
    pub route_table: String,
    pub peering_prefix: String,
}

impl ResourceNames {
    pub fn for_guard(id: &GuardId) -> Self {
        let id = id.as_str();
        Self {
            boundary: format!("{}-rg", id),
            firewall: format!("{}-nsg", id),
            network: format!("{}-vnet", id),
            subnet: format!("{}-subnet", id),
            public_ip: format!("{}-pip", id),
            interface: format!("{}-nic", id),
            machine: format!("{}-vm", id),
            route_table: format!("{}-routes", id),
            peering_prefix: format!("{}-peer", id),
        }
    }
}

/// Longest peering name the cloud accepts
pub const PEERING_NAME_MAX: usize = 80;
const PEERING_HASH_BYTES: usize = 4;

/// Peering name for a guard/remote pair; re-peering the pair yields the same name
///
/// `<id>-peer-<remote name>-<hash>`. The hash covers the full remote id, so
/// networks sharing a name in different boundaries or subscriptions never
/// share a peering.
pub fn peering_name(guard_id: &GuardId, remote_network_id: &str) -> String {
    let prefix = ResourceNames::for_guard(guard_id).peering_prefix;
    let hash = remote_id_hash(remote_network_id);
    let budget = PEERING_NAME_MAX.saturating_sub(prefix.len() + hash.len() + 2);
    let name: String = name_from_id(remote_network_id)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(budget)
        .collect();
    format!("{}-{}-{}", prefix, name, hash)
}

fn remote_id_hash(remote_network_id: &str) -> String {
    let canonical = remote_network_id.trim_end_matches('/').to_ascii_lowercase();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(PEERING_HASH_BYTES * 2);
    for byte in digest.iter().take(PEERING_HASH_BYTES) {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Parse a CIDR, rejecting host bits
pub fn validate_cidr(cidr: &str) -> Result<IpNet> {
    let net = IpNet::from_str(cidr.trim())
        .map_err(|e| Error::validation(format!("Invalid CIDR '{}': {}", cidr, e)))?;
    if net.trunc() != net {
        return Err(Error::validation(format!(
            "CIDR '{}' has host bits set (did you mean {}?)",
            cidr,
            net.trunc()
        )));
    }
    Ok(net)
}

/// Validate mesh CIDRs, dropping blanks and duplicates but keeping order
pub fn normalize_mesh_cidrs<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for cidr in cidrs {
        let cidr = cidr.as_ref().trim();
        if cidr.is_empty() {
            continue;
        }
        let net = validate_cidr(cidr)?.to_string();
        if !out.contains(&net) {
            out.push(net);
        }
    }
    Ok(out)
}

/// Firewall rule classes; each owns a reserved priority band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    WireGuard,
    Management,
    Mesh,
    Custom,
}

impl RuleClass {
    pub fn band(&self) -> RangeInclusive<u16> {
        match self {
            RuleClass::WireGuard => 100..=199,
            RuleClass::Management => 200..=299,
            RuleClass::Mesh => 300..=399,
            RuleClass::Custom => 1000..=3999,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RuleClass::WireGuard => "WireGuard",
            RuleClass::Management => "Management",
            RuleClass::Mesh => "Mesh",
            RuleClass::Custom => "Custom",
        }
    }
}

/// Upsert request for one firewall rule, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsgRuleRequest {
    pub rule_name: String,
    pub priority: u16,
    pub protocol: Protocol,
    pub dest_port: Option<u16>,
    pub direction: Direction,
    pub class: RuleClass,
}

impl NsgRuleRequest {
    pub const WIREGUARD_RULE: &'static str = "allow-wireguard";

    /// Inbound UDP rule for the WireGuard listener
    pub fn wireguard(port: u16) -> Self {
        Self {
            rule_name: Self::WIREGUARD_RULE.to_string(),
            priority: *RuleClass::WireGuard.band().start(),
            protocol: Protocol::Udp,
            dest_port: Some(port),
            direction: Direction::Inbound,
            class: RuleClass::WireGuard,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rule_name.is_empty() {
            return Err(Error::validation("Rule name cannot be empty"));
        }
        if !self
            .rule_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::validation(format!(
                "Rule name '{}' contains invalid characters",
                self.rule_name
            )));
        }
        let band = self.class.band();
        if !band.contains(&self.priority) {
            return Err(Error::validation(format!(
                "Priority {} of rule '{}' is outside the {} band {}-{}",
                self.priority,
                self.rule_name,
                self.class.display_name(),
                band.start(),
                band.end()
            )));
        }
        if self.dest_port == Some(0) {
            return Err(Error::validation("Destination port must be greater than 0"));
        }
        Ok(())
    }

    pub fn to_rule(&self) -> FirewallRule {
        FirewallRule {
            name: self.rule_name.clone(),
            priority: self.priority,
            protocol: self.protocol,
            dest_port: self.dest_port,
            direction: self.direction,
        }
    }
}

/// Status of a guard, derived from live resource properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GuardStatus {
    Provisioning,
    Active,
    #[default]
    PartiallyCreated,
    TearingDown,
    Degraded,
}

impl GuardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardStatus::Provisioning => "Provisioning",
            GuardStatus::Active => "Active",
            GuardStatus::PartiallyCreated => "PartiallyCreated",
            GuardStatus::TearingDown => "TearingDown",
            GuardStatus::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for GuardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of the resources a guard owns; absent ones are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardResources {
    pub boundary_id: Option<String>,
    pub firewall_id: Option<String>,
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub public_ip_id: Option<String>,
    pub interface_id: Option<String>,
    pub machine_id: Option<String>,
    pub route_table_id: Option<String>,
}

impl GuardResources {
    /// Ids of every resource that exists, boundary first
    pub fn existing(&self) -> Vec<String> {
        [
            &self.boundary_id,
            &self.firewall_id,
            &self.network_id,
            &self.subnet_id,
            &self.public_ip_id,
            &self.interface_id,
            &self.machine_id,
            &self.route_table_id,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    /// True when the whole network substrate exists
    pub fn network_complete(&self) -> bool {
        self.boundary_id.is_some()
            && self.firewall_id.is_some()
            && self.network_id.is_some()
            && self.subnet_id.is_some()
            && self.public_ip_id.is_some()
            && self.interface_id.is_some()
    }
}

/// One peering relationship of a guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringInfo {
    pub name: String,
    pub remote_network_id: String,
    pub route_table_id: Option<String>,
    pub state: PeeringState,
}

/// A gateway, reconstructed from live cloud resources; never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub guard_id: GuardId,
    pub location: Option<String>,
    pub boundary: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub resources: GuardResources,
    pub mesh_cidrs: Vec<String>,
    pub wireguard_port: Option<u16>,
    pub ip_forwarding: bool,
    pub machine_state: Option<MachineState>,
    pub status: GuardStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub peerings: Vec<PeeringInfo>,
}

impl Guard {
    pub const DISCOVERY_ERROR_KEY: &'static str = "discovery-error";

    /// Empty view of a guard with nothing discovered yet
    pub fn new(guard_id: GuardId) -> Self {
        let boundary = guard_id.names().boundary;
        Self {
            guard_id,
            location: None,
            boundary,
            public_ip: None,
            private_ip: None,
            resources: GuardResources::default(),
            mesh_cidrs: Vec::new(),
            wireguard_port: None,
            ip_forwarding: false,
            machine_state: None,
            status: GuardStatus::PartiallyCreated,
            created_at: None,
            metadata: BTreeMap::new(),
            peerings: Vec::new(),
        }
    }

    /// Placeholder entry for a guard whose reconstruction failed
    pub fn degraded(guard_id: GuardId, error: &Error) -> Self {
        let mut guard = Self::new(guard_id);
        guard.status = GuardStatus::Degraded;
        guard
            .metadata
            .insert(Self::DISCOVERY_ERROR_KEY.to_string(), error.to_string());
        guard
    }

    /// Insert or replace a peering, keeping entries unique by name
    pub fn upsert_peering(&mut self, info: PeeringInfo) {
        match self.peerings.iter_mut().find(|p| p.name == info.name) {
            Some(existing) => *existing = info,
            None => self.peerings.push(info),
        }
    }
}

/// Input for building a guard's network substrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub guard_id: GuardId,
    pub location: String,
    pub network_cidr: String,
    pub subnet_cidr: String,
    /// Ownership tags applied to every created resource
    pub tags: Tags,
    /// Tags for the boundary itself; a superset of `tags`
    pub boundary_tags: Tags,
}

impl NetworkRequest {
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(Error::validation("Location cannot be empty"));
        }
        let network = validate_cidr(&self.network_cidr)?;
        let subnet = validate_cidr(&self.subnet_cidr)?;
        if !network.contains(&subnet) {
            return Err(Error::validation(format!(
                "Subnet {} is not inside network {}",
                subnet, network
            )));
        }
        Ok(())
    }
}

/// Concrete identifiers and addresses of a guard's network substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub guard_id: GuardId,
    pub location: String,
    pub boundary: String,
    pub boundary_id: String,
    pub firewall_id: String,
    pub network_id: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub public_ip: Option<String>,
    pub interface_id: String,
    pub private_ip: Option<String>,
}

/// Input for peering a guard's network with a workload network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub guard_id: GuardId,
    pub guard_network_id: String,
    pub remote_network_id: String,
    pub peering_name: String,
    /// Next hop for propagated mesh routes
    pub guard_private_ip: String,
    pub mesh_cidrs: Vec<String>,
    /// When set, mesh routes are propagated into this subnet
    pub subnet_id: Option<String>,
}

/// What happened to the reciprocal (remote -> guard) link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteLinkStatus {
    Created,
    /// The remote side must be completed out-of-band
    Pending { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOutcome {
    pub peering: PeeringInfo,
    pub remote: RemoteLinkStatus,
    pub routes: Vec<Route>,
}

/// Result of deleting a guard's isolation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Operator request to create a guard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateGuardRequest {
    /// Falls back to the configured default location
    pub location: Option<String>,
    /// Raw WireGuard configuration text, passed through to the machine
    pub wireguard_conf: String,
    pub mesh_cidrs: Vec<String>,
    pub network_cidr: Option<String>,
    pub subnet_cidr: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl CreateGuardRequest {
    pub fn new(wireguard_conf: impl Into<String>) -> Self {
        Self {
            wireguard_conf: wireguard_conf.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_mesh_cidrs<S: Into<String>>(mut self, cidrs: impl IntoIterator<Item = S>) -> Self {
        self.mesh_cidrs = cidrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
