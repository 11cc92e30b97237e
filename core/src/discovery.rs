//! Stateless discovery of guards from tagged cloud resources
//!
//! Nothing is cached between calls: each lookup is a live resource-graph scan
//! and the returned [`Guard`] is a view assembled from whatever the scan saw.

use crate::model::{Guard, GuardId, GuardStatus, NsgRuleRequest, PeeringInfo, ResourceNames};
use crate::provider::GuardProvider;
use crate::resource::{
    network_id_of_subnet, CloudResource, MachineState, ProvisioningState, ResourceKind,
    ResourceSpec,
};
use crate::retry::RetryPolicy;
use crate::tags::TagScheme;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct Discovery {
    provider: Arc<dyn GuardProvider>,
    tags: TagScheme,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Discovery {
    pub fn new(provider: Arc<dyn GuardProvider>, tags: TagScheme, retry: RetryPolicy) -> Self {
        Self {
            provider,
            tags,
            retry,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound on guards reconstructed at once by [`Discovery::list_guards`]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reconstruct one guard from every resource tagged with its id
    ///
    /// Missing sub-resources leave the matching fields empty; only a guard
    /// with no resources at all is `NotFound`.
    pub async fn get_guard(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
    ) -> Result<Guard> {
        let filter = self.tags.guard_filter(guard_id);
        let resources = self
            .retry
            .run(cancel, &format!("query_tagged {}", guard_id), || {
                self.provider.query_tagged(&filter)
            })
            .await?;

        if resources.is_empty() {
            return Err(Error::not_found("guard", guard_id.as_str()));
        }
        debug!(guard_id = %guard_id, resources = resources.len(), "Assembling guard");
        Ok(assemble_guard(&self.tags, guard_id, &resources))
    }

    /// Every guard under the management marker, sorted by id
    ///
    /// Each guard is reconstructed independently; one that fails shows up as
    /// a `Degraded` entry instead of aborting the scan.
    pub async fn list_guards(&self, cancel: &CancellationToken) -> Result<Vec<Guard>> {
        let filter = self.tags.managed_filter(&[ResourceKind::Boundary]);
        let boundaries = self
            .retry
            .run(cancel, "query_tagged boundaries", || self.provider.query_tagged(&filter))
            .await?;

        let mut ids: Vec<GuardId> = boundaries
            .iter()
            .filter_map(|b| self.tags.decode(&b.tags).map(|d| d.guard_id))
            .collect();
        ids.sort();
        ids.dedup();
        debug!(count = ids.len(), "Discovered guard boundaries");

        let mut guards: Vec<Guard> = stream::iter(ids)
            .map(|guard_id| async move {
                let result = self.get_guard(cancel, &guard_id).await;
                match result {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(guard_id = %guard_id, error = %e, "Guard reconstruction failed");
                        Guard::degraded(guard_id, &e)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(Error::cancelled("list_guards"));
        }

        guards.sort_by(|a, b| a.guard_id.cmp(&b.guard_id));
        info!(count = guards.len(), "Listed guards");
        Ok(guards)
    }
}

fn expected_name(names: &ResourceNames, kind: ResourceKind) -> &str {
    match kind {
        ResourceKind::Boundary => &names.boundary,
        ResourceKind::Firewall => &names.firewall,
        ResourceKind::Network => &names.network,
        ResourceKind::PublicIp => &names.public_ip,
        ResourceKind::Interface => &names.interface,
        ResourceKind::RouteTable => &names.route_table,
        ResourceKind::Machine => &names.machine,
    }
}

/// Build a guard view from its tagged resources
///
/// Only resources inside the guard's boundary with their deterministic name
/// are used; anything else carrying the guard's tags is ignored.
pub fn assemble_guard(
    tags: &TagScheme,
    guard_id: &GuardId,
    resources: &[CloudResource],
) -> Guard {
    let names = guard_id.names();
    let peering_prefix = format!("{}-", names.peering_prefix);
    let mut guard = Guard::new(guard_id.clone());
    let mut boundary_state = None;
    let mut fallback_cidrs = None;
    let mut network: Option<&CloudResource> = None;
    let mut route_table: Option<&CloudResource> = None;

    for resource in resources {
        let kind = resource.kind();
        if !resource.boundary.eq_ignore_ascii_case(&names.boundary)
            || !resource.name.eq_ignore_ascii_case(expected_name(&names, kind))
        {
            debug!(id = %resource.id, "Ignoring stray tagged resource");
            continue;
        }

        match &resource.spec {
            ResourceSpec::Boundary(spec) => {
                guard.resources.boundary_id = Some(resource.id.clone());
                guard.location = Some(resource.location.clone());
                boundary_state = Some(spec.provisioning_state);
                if let Some(decoded) = tags.decode(&resource.tags) {
                    guard.mesh_cidrs = decoded.mesh_cidrs;
                    guard.created_at = decoded.created_at;
                    guard.metadata.extend(decoded.metadata);
                }
            }
            ResourceSpec::Firewall(spec) => {
                guard.resources.firewall_id = Some(resource.id.clone());
                guard.wireguard_port = spec
                    .rules
                    .iter()
                    .find(|r| r.name == NsgRuleRequest::WIREGUARD_RULE)
                    .and_then(|r| r.dest_port);
            }
            ResourceSpec::Network(spec) => {
                guard.resources.network_id = Some(resource.id.clone());
                guard.resources.subnet_id = spec
                    .subnets
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(&names.subnet))
                    .map(|s| s.id.clone());
                network = Some(resource);
            }
            ResourceSpec::PublicIp(spec) => {
                guard.resources.public_ip_id = Some(resource.id.clone());
                guard.public_ip = spec.ip_address.clone();
            }
            ResourceSpec::Interface(spec) => {
                guard.resources.interface_id = Some(resource.id.clone());
                guard.private_ip = spec.private_ip.clone();
                guard.ip_forwarding = spec.ip_forwarding;
            }
            ResourceSpec::RouteTable(_) => {
                guard.resources.route_table_id = Some(resource.id.clone());
                route_table = Some(resource);
            }
            ResourceSpec::Machine(spec) => {
                guard.resources.machine_id = Some(resource.id.clone());
                guard.machine_state = Some(spec.state);
            }
        }

        if guard.location.is_none() {
            guard.location = Some(resource.location.clone());
        }
        if fallback_cidrs.is_none() && kind != ResourceKind::Boundary {
            fallback_cidrs = tags.decode(&resource.tags).map(|d| d.mesh_cidrs);
        }
    }

    // Without a boundary the mesh set comes from any other owned resource
    if guard.resources.boundary_id.is_none() {
        guard.mesh_cidrs = fallback_cidrs.unwrap_or_default();
    }

    if let Some(spec) = network.and_then(|n| n.as_network()) {
        let associated = route_table
            .and_then(|rt| rt.as_route_table())
            .map(|rt| rt.subnets.as_slice())
            .unwrap_or(&[]);
        let mut links: Vec<_> = spec
            .peerings
            .iter()
            .filter(|p| p.name.starts_with(&peering_prefix))
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));

        for link in links {
            let routed = associated.iter().any(|subnet| {
                network_id_of_subnet(subnet)
                    .map(|n| n.eq_ignore_ascii_case(&link.remote_network_id))
                    .unwrap_or(false)
            });
            guard.upsert_peering(PeeringInfo {
                name: link.name.clone(),
                remote_network_id: link.remote_network_id.clone(),
                route_table_id: route_table.filter(|_| routed).map(|rt| rt.id.clone()),
                state: link.state,
            });
        }
    }

    guard.status = derive_status(&guard, boundary_state);
    guard
}

/// Status from live properties only
pub fn derive_status(guard: &Guard, boundary_state: Option<ProvisioningState>) -> GuardStatus {
    match boundary_state {
        Some(ProvisioningState::Deleting) => return GuardStatus::TearingDown,
        Some(ProvisioningState::Creating) => return GuardStatus::Provisioning,
        _ => {}
    }
    match guard.machine_state {
        Some(MachineState::Creating) | Some(MachineState::Starting) => GuardStatus::Provisioning,
        Some(MachineState::Running)
            if guard.resources.network_complete() && guard.ip_forwarding =>
        {
            GuardStatus::Active
        }
        _ => GuardStatus::PartiallyCreated,
    }
}
