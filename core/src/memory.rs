//! In-memory cloud backend
//!
//! Implements both capability traits over a process-local store so the
//! orchestration layer can be exercised offline. Resource ids use the same
//! layout as the Azure backend. Test hooks inject faults, deny remote
//! peerings and remove resources behind the orchestrator's back.

use crate::azure::{boundary_id, resource_id};
use crate::provider::{GuardProvider, MachineProvider, ServerInfo, ServerSpec};
use crate::resource::{
    name_from_id, network_id_of_subnet, subnet_id, BoundarySpec, CloudResource, FirewallRule,
    MachineSpec, MachineState, PeeringLink, PeeringState, ProvisioningState, ResourceKind,
    ResourceSpec, Route, RouteTableSpec, SubnetSpec, TagFilter, Tags,
};
use crate::{Error, PermanentReason, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub const DEFAULT_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Default)]
struct State {
    boundaries: BTreeMap<String, CloudResource>,
    /// Every non-boundary resource, keyed by id
    resources: BTreeMap<String, CloudResource>,
    create_calls: HashMap<ResourceKind, u32>,
    subnet_creates: u32,
    /// Queued failures per operation name, consumed one per call
    faults: HashMap<String, VecDeque<Error>>,
    denied_peering: BTreeSet<String>,
    /// Tag values whose queries fail permanently
    poisoned_queries: BTreeSet<String>,
    /// Forwarding updates accepted but not applied
    stalled_forwarding: u32,
    user_data: BTreeMap<String, String>,
    next_public_ip: u32,
}

impl State {
    fn take_fault(&mut self, operation: &str) -> Result<()> {
        match self.faults.get_mut(operation).and_then(|q| q.pop_front()) {
            Some(err) => {
                debug!(operation, error = %err, "Injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn count_create(&mut self, kind: ResourceKind) {
        *self.create_calls.entry(kind).or_insert(0) += 1;
    }

    fn network_mut(&mut self, network_id: &str) -> Result<&mut crate::resource::NetworkSpec> {
        match self.resources.get_mut(network_id).map(|r| &mut r.spec) {
            Some(ResourceSpec::Network(spec)) => Ok(spec),
            _ => Err(Error::not_found(ResourceKind::Network, network_id)),
        }
    }

    fn subnet_mut(&mut self, id: &str) -> Result<&mut SubnetSpec> {
        let network_id = network_id_of_subnet(id)
            .ok_or_else(|| Error::not_found("subnet", id))?
            .to_string();
        let network = self
            .network_mut(&network_id)
            .map_err(|_| Error::not_found("subnet", id))?;
        network
            .subnets
            .iter_mut()
            .find(|s| s.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| Error::not_found("subnet", id))
    }

    fn find_subnet(&self, id: &str) -> Option<&SubnetSpec> {
        let network_id = network_id_of_subnet(id)?;
        self.resources
            .get(network_id)
            .and_then(|r| r.as_network())
            .and_then(|n| n.subnets.iter().find(|s| s.id.eq_ignore_ascii_case(id)))
    }

    fn route_table_mut(&mut self, id: &str) -> Result<&mut RouteTableSpec> {
        match self.resources.get_mut(id).map(|r| &mut r.spec) {
            Some(ResourceSpec::RouteTable(spec)) => Ok(spec),
            _ => Err(Error::not_found(ResourceKind::RouteTable, id)),
        }
    }

    fn allocate_public_ip(&mut self) -> String {
        self.next_public_ip += 1;
        let n = self.next_public_ip;
        format!("20.50.{}.{}", n / 250, n % 250 + 1)
    }

    /// First free host after the four addresses the cloud reserves
    fn allocate_private_ip(&self, subnet: &SubnetSpec) -> Result<String> {
        let net = IpNet::from_str(&subnet.address_prefix).map_err(|e| {
            Error::permanent(
                "create_interface",
                PermanentReason::InvalidParameter,
                format!("subnet prefix '{}': {}", subnet.address_prefix, e),
            )
        })?;
        let taken: BTreeSet<String> = self
            .resources
            .values()
            .filter_map(|r| r.as_interface())
            .filter(|nic| nic.subnet_id.eq_ignore_ascii_case(&subnet.id))
            .filter_map(|nic| nic.private_ip.clone())
            .collect();
        net.hosts()
            .skip(3)
            .map(|ip| ip.to_string())
            .find(|ip| !taken.contains(ip))
            .ok_or_else(|| {
                Error::permanent(
                    "create_interface",
                    PermanentReason::Quota,
                    format!("subnet {} has no free addresses", subnet.id),
                )
            })
    }
}

/// Process-local cloud used by tests and offline runs
#[derive(Debug)]
pub struct MemoryCloud {
    subscription: String,
    state: Mutex<State>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            subscription: DEFAULT_SUBSCRIPTION.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ==================== Test hooks ====================

    /// Fail the next call of `operation` with `error`
    ///
    /// Operation names are the trait method names, except `create_resource`
    /// which uses `create_<kind>` (e.g. `create_public_ip`).
    pub fn fail_next(&self, operation: &str, error: Error) {
        self.state()
            .faults
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Reject peering links created on `network_id`
    pub fn deny_peering_on(&self, network_id: &str) {
        self.state().denied_peering.insert(network_id.to_string());
    }

    /// Fail every tagged query that filters on `tag_value`
    pub fn fail_queries_for(&self, tag_value: &str) {
        self.state().poisoned_queries.insert(tag_value.to_string());
    }

    /// Accept the next `count` forwarding updates without applying them
    pub fn stall_forwarding(&self, count: u32) {
        self.state().stalled_forwarding = count;
    }

    /// Remove a resource directly, as if deleted out-of-band
    pub fn remove_resource(&self, id: &str) -> bool {
        self.state().resources.remove(id).is_some()
    }

    pub fn set_boundary_state(&self, name: &str, provisioning_state: ProvisioningState) {
        if let Some(boundary) = self.state().boundaries.get_mut(name) {
            boundary.spec = ResourceSpec::Boundary(BoundarySpec { provisioning_state });
        }
    }

    pub fn set_machine_state(&self, id: &str, machine_state: MachineState) {
        if let Some(ResourceSpec::Machine(spec)) =
            self.state().resources.get_mut(id).map(|r| &mut r.spec)
        {
            spec.state = machine_state;
        }
    }

    /// Seed a workload network (and its boundary) that the guard can peer with
    pub fn add_network(
        &self,
        boundary: &str,
        name: &str,
        location: &str,
        address_space: &str,
        subnets: &[(&str, &str)],
    ) -> String {
        let mut state = self.state();
        state
            .boundaries
            .entry(boundary.to_string())
            .or_insert_with(|| CloudResource {
                id: boundary_id(&self.subscription, boundary),
                name: boundary.to_string(),
                boundary: boundary.to_string(),
                location: location.to_string(),
                tags: Tags::new(),
                spec: ResourceSpec::Boundary(BoundarySpec {
                    provisioning_state: ProvisioningState::Succeeded,
                }),
            });

        let id = resource_id(&self.subscription, boundary, ResourceKind::Network, name);
        let subnets = subnets
            .iter()
            .map(|(subnet, prefix)| SubnetSpec {
                id: subnet_id(&id, subnet),
                name: subnet.to_string(),
                address_prefix: prefix.to_string(),
                firewall_id: None,
                route_table_id: None,
            })
            .collect();
        state.resources.insert(
            id.clone(),
            CloudResource {
                id: id.clone(),
                name: name.to_string(),
                boundary: boundary.to_string(),
                location: location.to_string(),
                tags: Tags::new(),
                spec: ResourceSpec::Network(crate::resource::NetworkSpec {
                    address_space: vec![address_space.to_string()],
                    subnets,
                    peerings: Vec::new(),
                }),
            },
        );
        id
    }

    // ==================== Inspection ====================

    pub fn create_count(&self, kind: ResourceKind) -> u32 {
        self.state().create_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn subnet_create_count(&self) -> u32 {
        self.state().subnet_creates
    }

    pub fn resource_count(&self) -> usize {
        let state = self.state();
        state.boundaries.len() + state.resources.len()
    }

    pub fn boundary_exists(&self, name: &str) -> bool {
        self.state().boundaries.contains_key(name)
    }

    pub fn resource(&self, id: &str) -> Option<CloudResource> {
        self.state().resources.get(id).cloned()
    }

    pub fn subnet(&self, id: &str) -> Option<SubnetSpec> {
        self.state().find_subnet(id).cloned()
    }

    pub fn peering(&self, network_id: &str, name: &str) -> Option<PeeringLink> {
        self.state()
            .resources
            .get(network_id)
            .and_then(|r| r.as_network())
            .and_then(|n| n.peerings.iter().find(|p| p.name == name).cloned())
    }

    pub fn user_data(&self, server_id: &str) -> Option<String> {
        self.state().user_data.get(server_id).cloned()
    }
}

#[async_trait]
impl GuardProvider for MemoryCloud {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_boundary(&self, name: &str) -> Result<Option<CloudResource>> {
        let mut state = self.state();
        state.take_fault("get_boundary")?;
        Ok(state.boundaries.get(name).cloned())
    }

    async fn create_boundary(
        &self,
        name: &str,
        location: &str,
        tags: &Tags,
    ) -> Result<CloudResource> {
        let mut state = self.state();
        state.take_fault("create_boundary")?;
        state.count_create(ResourceKind::Boundary);

        let boundary = state
            .boundaries
            .entry(name.to_string())
            .or_insert_with(|| CloudResource {
                id: boundary_id(&self.subscription, name),
                name: name.to_string(),
                boundary: name.to_string(),
                location: location.to_string(),
                tags: Tags::new(),
                spec: ResourceSpec::Boundary(BoundarySpec {
                    provisioning_state: ProvisioningState::Succeeded,
                }),
            });
        boundary.tags = tags.clone();
        Ok(boundary.clone())
    }

    async fn delete_boundary(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("delete_boundary")?;
        if !state.boundaries.contains_key(name) {
            return Err(Error::not_found(ResourceKind::Boundary, name));
        }

        let removed: BTreeSet<String> = state
            .resources
            .values()
            .filter(|r| r.boundary == name)
            .map(|r| r.id.clone())
            .collect();

        // A route table still attached to a subnet elsewhere pins the boundary
        let pinned = state
            .resources
            .values()
            .filter(|r| r.boundary != name)
            .filter_map(|r| r.as_network())
            .flat_map(|n| n.subnets.iter())
            .find(|s| {
                s.route_table_id
                    .as_ref()
                    .map(|rt| removed.contains(rt))
                    .unwrap_or(false)
            });
        if let Some(subnet) = pinned {
            return Err(Error::permanent(
                format!("delete_boundary {}", name),
                PermanentReason::Conflict,
                format!("InUseRouteTableCannotBeDeleted: still associated with {}", subnet.id),
            ));
        }

        state.boundaries.remove(name);
        state.resources.retain(|id, _| !removed.contains(id));
        state.user_data.retain(|id, _| !removed.contains(id));

        // Surviving networks see their links to deleted networks disconnect
        for resource in state.resources.values_mut() {
            if let ResourceSpec::Network(network) = &mut resource.spec {
                for link in &mut network.peerings {
                    if removed.contains(&link.remote_network_id) {
                        link.state = PeeringState::Disconnected;
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_resource(
        &self,
        boundary: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<CloudResource>> {
        let mut state = self.state();
        state.take_fault("get_resource")?;
        let id = resource_id(&self.subscription, boundary, kind, name);
        Ok(state.resources.get(&id).cloned())
    }

    async fn get_resource_by_id(&self, id: &str) -> Result<Option<CloudResource>> {
        let mut state = self.state();
        state.take_fault("get_resource_by_id")?;
        if let Some(resource) = state.resources.get(id) {
            return Ok(Some(resource.clone()));
        }
        Ok(state.boundaries.values().find(|b| b.id == id).cloned())
    }

    async fn create_resource(
        &self,
        boundary: &str,
        name: &str,
        location: &str,
        tags: &Tags,
        spec: ResourceSpec,
    ) -> Result<CloudResource> {
        let kind = spec.kind();
        let mut state = self.state();
        state.take_fault(&format!("create_{}", kind))?;
        if !state.boundaries.contains_key(boundary) {
            return Err(Error::not_found(ResourceKind::Boundary, boundary));
        }
        state.count_create(kind);

        let id = resource_id(&self.subscription, boundary, kind, name);
        if let Some(existing) = state.resources.get_mut(&id) {
            existing.tags = tags.clone();
            return Ok(existing.clone());
        }

        let spec = match spec {
            ResourceSpec::Network(mut network) => {
                for subnet in &mut network.subnets {
                    subnet.id = subnet_id(&id, &subnet.name);
                }
                ResourceSpec::Network(network)
            }
            ResourceSpec::PublicIp(mut pip) => {
                pip.ip_address = Some(state.allocate_public_ip());
                ResourceSpec::PublicIp(pip)
            }
            ResourceSpec::Interface(mut nic) => {
                let subnet = state.find_subnet(&nic.subnet_id).cloned().ok_or_else(|| {
                    Error::permanent(
                        format!("create_interface {}", name),
                        PermanentReason::InvalidParameter,
                        format!("subnet {} does not exist", nic.subnet_id),
                    )
                })?;
                nic.private_ip = Some(state.allocate_private_ip(&subnet)?);
                ResourceSpec::Interface(nic)
            }
            other => other,
        };

        let resource = CloudResource {
            id: id.clone(),
            name: name.to_string(),
            boundary: boundary.to_string(),
            location: location.to_string(),
            tags: tags.clone(),
            spec,
        };
        state.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn get_subnet(&self, network_id: &str, name: &str) -> Result<Option<SubnetSpec>> {
        let mut state = self.state();
        state.take_fault("get_subnet")?;
        Ok(state.find_subnet(&subnet_id(network_id, name)).cloned())
    }

    async fn create_subnet(&self, network_id: &str, subnet: &SubnetSpec) -> Result<SubnetSpec> {
        let mut state = self.state();
        state.take_fault("create_subnet")?;
        state.subnet_creates += 1;

        let network = state.network_mut(network_id)?;
        let mut created = subnet.clone();
        created.id = subnet_id(network_id, &subnet.name);
        match network.subnets.iter_mut().find(|s| s.name == subnet.name) {
            Some(existing) => *existing = created.clone(),
            None => network.subnets.push(created.clone()),
        }
        Ok(created)
    }

    async fn list_firewall_rules(&self, firewall_id: &str) -> Result<Vec<FirewallRule>> {
        let mut state = self.state();
        state.take_fault("list_firewall_rules")?;
        state
            .resources
            .get(firewall_id)
            .and_then(|r| r.as_firewall())
            .map(|fw| fw.rules.clone())
            .ok_or_else(|| Error::not_found(ResourceKind::Firewall, firewall_id))
    }

    async fn put_firewall_rule(&self, firewall_id: &str, rule: &FirewallRule) -> Result<()> {
        let mut state = self.state();
        state.take_fault("put_firewall_rule")?;
        let firewall = match state.resources.get_mut(firewall_id).map(|r| &mut r.spec) {
            Some(ResourceSpec::Firewall(spec)) => spec,
            _ => return Err(Error::not_found(ResourceKind::Firewall, firewall_id)),
        };

        if let Some(clash) = firewall.rules.iter().find(|r| {
            r.name != rule.name && r.priority == rule.priority && r.direction == rule.direction
        }) {
            return Err(Error::permanent(
                format!("put_firewall_rule {}", rule.name),
                PermanentReason::InvalidParameter,
                format!("priority {} already used by rule '{}'", rule.priority, clash.name),
            ));
        }

        match firewall.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule.clone(),
            None => firewall.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn set_ip_forwarding(&self, interface_id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state();
        state.take_fault("set_ip_forwarding")?;
        if state.stalled_forwarding > 0 {
            state.stalled_forwarding -= 1;
            if state.resources.contains_key(interface_id) {
                return Ok(());
            }
        }
        match state.resources.get_mut(interface_id).map(|r| &mut r.spec) {
            Some(ResourceSpec::Interface(nic)) => {
                nic.ip_forwarding = enabled;
                Ok(())
            }
            _ => Err(Error::not_found(ResourceKind::Interface, interface_id)),
        }
    }

    async fn query_tagged(&self, filter: &TagFilter) -> Result<Vec<CloudResource>> {
        let mut state = self.state();
        state.take_fault("query_tagged")?;
        if let Some((_, value)) = filter
            .tags
            .iter()
            .find(|(_, v)| state.poisoned_queries.contains(v))
        {
            return Err(Error::permanent(
                "query_tagged",
                PermanentReason::Other,
                format!("malformed resource set for '{}'", value),
            ));
        }
        Ok(state
            .boundaries
            .values()
            .chain(state.resources.values())
            .filter(|r| filter.matches(r.kind(), &r.tags))
            .cloned()
            .collect())
    }

    async fn list_peerings(&self, network_id: &str) -> Result<Vec<PeeringLink>> {
        let mut state = self.state();
        state.take_fault("list_peerings")?;
        Ok(state.network_mut(network_id)?.peerings.clone())
    }

    async fn upsert_peering(&self, network_id: &str, link: &PeeringLink) -> Result<PeeringLink> {
        let mut state = self.state();
        state.take_fault("upsert_peering")?;
        if state.denied_peering.contains(network_id) {
            return Err(Error::permanent(
                format!("upsert_peering {}", link.name),
                PermanentReason::PermissionDenied,
                format!("AuthorizationFailed: no write access to {}", network_id),
            ));
        }
        state.network_mut(network_id)?;

        let reciprocal = state
            .resources
            .get(&link.remote_network_id)
            .and_then(|r| r.as_network())
            .map(|remote| remote.peerings.iter().any(|p| p.remote_network_id == network_id))
            .unwrap_or(false);

        let mut stored = link.clone();
        stored.state = if reciprocal {
            PeeringState::Connected
        } else {
            PeeringState::Initiated
        };

        if reciprocal {
            if let Ok(remote) = state.network_mut(&link.remote_network_id) {
                for p in remote.peerings.iter_mut().filter(|p| p.remote_network_id == network_id) {
                    p.state = PeeringState::Connected;
                }
            }
        }

        let network = state.network_mut(network_id)?;
        match network.peerings.iter_mut().find(|p| p.name == link.name) {
            Some(existing) => *existing = stored.clone(),
            None => network.peerings.push(stored.clone()),
        }
        Ok(stored)
    }

    async fn delete_peering(&self, network_id: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("delete_peering")?;
        let network = state.network_mut(network_id)?;
        let idx = network
            .peerings
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::not_found("peering", name))?;
        let removed = network.peerings.remove(idx);

        if let Ok(remote) = state.network_mut(&removed.remote_network_id) {
            for p in remote.peerings.iter_mut().filter(|p| p.remote_network_id == network_id) {
                p.state = PeeringState::Disconnected;
            }
        }
        Ok(())
    }

    async fn upsert_route(&self, route_table_id: &str, route: &Route) -> Result<()> {
        let mut state = self.state();
        state.take_fault("upsert_route")?;
        let table = state.route_table_mut(route_table_id)?;
        match table.routes.iter_mut().find(|r| r.name == route.name) {
            Some(existing) => *existing = route.clone(),
            None => table.routes.push(route.clone()),
        }
        Ok(())
    }

    async fn delete_route(&self, route_table_id: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("delete_route")?;
        let table = state.route_table_mut(route_table_id)?;
        let before = table.routes.len();
        table.routes.retain(|r| r.name != name);
        if table.routes.len() == before {
            return Err(Error::not_found("route", name));
        }
        Ok(())
    }

    async fn associate_route_table(&self, subnet_id: &str, route_table_id: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("associate_route_table")?;
        state.route_table_mut(route_table_id)?;

        let subnet = state.subnet_mut(subnet_id)?;
        let previous = subnet.route_table_id.replace(route_table_id.to_string());
        let canonical = subnet.id.clone();

        if let Some(previous) = previous.filter(|p| p != route_table_id) {
            if let Ok(old) = state.route_table_mut(&previous) {
                old.subnets.retain(|s| !s.eq_ignore_ascii_case(&canonical));
            }
        }
        let table = state.route_table_mut(route_table_id)?;
        if !table.subnets.iter().any(|s| s.eq_ignore_ascii_case(&canonical)) {
            table.subnets.push(canonical);
        }
        Ok(())
    }

    async fn dissociate_route_table(&self, subnet_id: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("dissociate_route_table")?;
        let subnet = state.subnet_mut(subnet_id)?;
        let canonical = subnet.id.clone();
        if let Some(table_id) = subnet.route_table_id.take() {
            if let Ok(table) = state.route_table_mut(&table_id) {
                table.subnets.retain(|s| !s.eq_ignore_ascii_case(&canonical));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MachineProvider for MemoryCloud {
    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo> {
        let mut state = self.state();
        state.take_fault("create_server")?;
        if !state.boundaries.contains_key(&spec.boundary) {
            return Err(Error::not_found(ResourceKind::Boundary, &spec.boundary));
        }
        if !state.resources.contains_key(&spec.interface_id) {
            return Err(Error::permanent(
                format!("create_server {}", spec.name),
                PermanentReason::InvalidParameter,
                format!("interface {} does not exist", spec.interface_id),
            ));
        }
        state.count_create(ResourceKind::Machine);

        let id = resource_id(&self.subscription, &spec.boundary, ResourceKind::Machine, &spec.name);
        let resource = CloudResource {
            id: id.clone(),
            name: spec.name.clone(),
            boundary: spec.boundary.clone(),
            location: spec.location.clone(),
            tags: spec.tags.clone(),
            spec: ResourceSpec::Machine(MachineSpec {
                size: spec.size.clone(),
                interface_id: spec.interface_id.clone(),
                state: MachineState::Running,
            }),
        };
        state.resources.insert(id.clone(), resource);
        state.user_data.insert(id.clone(), spec.user_data.clone());

        Ok(ServerInfo {
            id,
            name: spec.name.clone(),
            boundary: spec.boundary.clone(),
            location: spec.location.clone(),
            state: MachineState::Running,
            tags: spec.tags.clone(),
        })
    }

    async fn delete_server(&self, boundary: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.take_fault("delete_server")?;
        let id = resource_id(&self.subscription, boundary, ResourceKind::Machine, name);
        if state.resources.remove(&id).is_none() {
            return Err(Error::not_found(ResourceKind::Machine, name));
        }
        state.user_data.remove(&id);
        Ok(())
    }

    async fn list_servers(&self, boundary: &str) -> Result<Vec<ServerInfo>> {
        let mut state = self.state();
        state.take_fault("list_servers")?;
        Ok(state
            .resources
            .values()
            .filter(|r| r.boundary == boundary)
            .filter_map(|r| {
                r.as_machine().map(|m| ServerInfo {
                    id: r.id.clone(),
                    name: name_from_id(&r.id).to_string(),
                    boundary: r.boundary.clone(),
                    location: r.location.clone(),
                    state: m.state,
                    tags: r.tags.clone(),
                })
            })
            .collect())
    }
}
