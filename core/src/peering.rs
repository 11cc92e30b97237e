//! Bidirectional peering between a guard network and a workload network,
//! with mesh-route propagation into the workload subnet

use crate::model::{
    normalize_mesh_cidrs, peering_name, Guard, GuardId, PeerOutcome, PeerRequest, PeeringInfo,
    RemoteLinkStatus,
};
use crate::provider::GuardProvider;
use crate::resource::{
    name_from_id, network_id_of_subnet, CloudResource, PeeringLink, PeeringState, ResourceKind,
    ResourceSpec, Route, RouteTableSpec, MESH_ROUTE_PREFIX,
};
use crate::retry::RetryPolicy;
use crate::{Error, PermanentReason, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Build a peer request for a discovered guard
pub fn peer_request(
    guard: &Guard,
    remote_network_id: &str,
    subnet_id: Option<String>,
) -> Result<PeerRequest> {
    let guard_network_id = guard.resources.network_id.clone().ok_or_else(|| {
        Error::validation(format!("Guard {} has no network to peer", guard.guard_id))
    })?;
    let guard_private_ip = guard.private_ip.clone().ok_or_else(|| {
        Error::validation(format!("Guard {} has no private address yet", guard.guard_id))
    })?;
    Ok(PeerRequest {
        guard_id: guard.guard_id.clone(),
        guard_network_id,
        remote_network_id: remote_network_id.to_string(),
        peering_name: peering_name(&guard.guard_id, remote_network_id),
        guard_private_ip,
        mesh_cidrs: guard.mesh_cidrs.clone(),
        subnet_id,
    })
}

fn same_id(a: &str, b: &str) -> bool {
    a.trim_end_matches('/').eq_ignore_ascii_case(b.trim_end_matches('/'))
}

pub struct PeeringManager {
    provider: Arc<dyn GuardProvider>,
    retry: RetryPolicy,
}

impl PeeringManager {
    pub fn new(provider: Arc<dyn GuardProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    fn validate(req: &PeerRequest) -> Result<Vec<String>> {
        let prefix = format!("{}-", req.guard_id.names().peering_prefix);
        if !req.peering_name.starts_with(&prefix) {
            return Err(Error::validation(format!(
                "Peering name '{}' must start with '{}'",
                req.peering_name, prefix
            )));
        }
        if req.remote_network_id.trim().is_empty() {
            return Err(Error::validation("Remote network id cannot be empty"));
        }
        if same_id(&req.guard_network_id, &req.remote_network_id) {
            return Err(Error::validation("Cannot peer a network with itself"));
        }
        let cidrs = normalize_mesh_cidrs(&req.mesh_cidrs)?;

        if let Some(subnet) = &req.subnet_id {
            let under_remote = network_id_of_subnet(subnet)
                .map(|n| same_id(n, &req.remote_network_id))
                .unwrap_or(false);
            if !under_remote {
                return Err(Error::validation(format!(
                    "Subnet {} is not part of {}",
                    subnet, req.remote_network_id
                )));
            }
            req.guard_private_ip.parse::<IpAddr>().map_err(|e| {
                Error::validation(format!(
                    "Invalid guard private address '{}': {}",
                    req.guard_private_ip, e
                ))
            })?;
        }
        Ok(cidrs)
    }

    /// Link guard -> remote and, where permitted, remote -> guard
    ///
    /// A reciprocal link refused for lack of permission leaves the peering
    /// pending for the remote owner to complete; it is not an error.
    pub async fn peer_network(
        &self,
        cancel: &CancellationToken,
        req: &PeerRequest,
    ) -> Result<PeerOutcome> {
        let mesh_cidrs = Self::validate(req)?;

        let existing = self.list_links(cancel, &req.guard_network_id).await?;
        if let Some(link) = existing.iter().find(|l| l.name == req.peering_name) {
            if !same_id(&link.remote_network_id, &req.remote_network_id) {
                return Err(Error::permanent(
                    format!("upsert_peering {}", req.peering_name),
                    PermanentReason::Conflict,
                    format!(
                        "peering {} already links to {}",
                        req.peering_name, link.remote_network_id
                    ),
                ));
            }
        }

        let local = PeeringLink::new(&req.peering_name, &req.remote_network_id);
        self.retry
            .run(cancel, &format!("upsert_peering {}", req.peering_name), || {
                self.provider.upsert_peering(&req.guard_network_id, &local)
            })
            .await?;
        info!(
            guard_id = %req.guard_id,
            peering = %req.peering_name,
            "Local peering link in place"
        );

        let reciprocal = PeeringLink::new(&req.peering_name, &req.guard_network_id);
        let remote = match self
            .retry
            .run(cancel, &format!("upsert_peering {} (remote)", req.peering_name), || {
                self.provider.upsert_peering(&req.remote_network_id, &reciprocal)
            })
            .await
        {
            Ok(_) => RemoteLinkStatus::Created,
            Err(e) if e.is_permission_denied() => {
                warn!(
                    guard_id = %req.guard_id,
                    remote = %req.remote_network_id,
                    "No permission on the remote network; reciprocal link left pending"
                );
                RemoteLinkStatus::Pending { reason: e.to_string() }
            }
            Err(e) => return Err(e),
        };

        // The local link only reports Connected once the other side exists
        let links = self.list_links(cancel, &req.guard_network_id).await?;
        let state = links
            .iter()
            .find(|l| l.name == req.peering_name)
            .map(|l| l.state)
            .unwrap_or(PeeringState::Initiated);

        let (route_table_id, routes) = match &req.subnet_id {
            Some(subnet_id) => {
                let (table_id, routes) = self
                    .propagate_routes(cancel, req, subnet_id, &mesh_cidrs)
                    .await?;
                (Some(table_id), routes)
            }
            None => (None, Vec::new()),
        };

        Ok(PeerOutcome {
            peering: PeeringInfo {
                name: req.peering_name.clone(),
                remote_network_id: req.remote_network_id.clone(),
                route_table_id,
                state,
            },
            remote,
            routes,
        })
    }

    async fn list_links(
        &self,
        cancel: &CancellationToken,
        network_id: &str,
    ) -> Result<Vec<PeeringLink>> {
        self.retry
            .run(cancel, &format!("list_peerings {}", name_from_id(network_id)), || {
                self.provider.list_peerings(network_id)
            })
            .await
    }

    /// Converge the guard's route table onto `mesh_cidrs` and attach it to `subnet_id`
    async fn propagate_routes(
        &self,
        cancel: &CancellationToken,
        req: &PeerRequest,
        subnet_id: &str,
        mesh_cidrs: &[String],
    ) -> Result<(String, Vec<Route>)> {
        let table = self.ensure_route_table(cancel, req).await?;
        let current = table
            .as_route_table()
            .map(|t| t.routes.clone())
            .unwrap_or_default();
        let wanted: Vec<Route> = mesh_cidrs
            .iter()
            .map(|cidr| Route::for_mesh_cidr(cidr, &req.guard_private_ip))
            .collect();

        for route in wanted.iter().filter(|r| !current.contains(r)) {
            self.retry
                .run(cancel, &format!("upsert_route {}", route.name), || {
                    self.provider.upsert_route(&table.id, route)
                })
                .await?;
            info!(route = %route.name, next_hop = %route.next_hop_ip, "Upserted mesh route");
        }

        let stale = current.iter().filter(|r| {
            r.name.starts_with(MESH_ROUTE_PREFIX) && !wanted.iter().any(|w| w.name == r.name)
        });
        for route in stale {
            let result = self
                .retry
                .run(cancel, &format!("delete_route {}", route.name), || {
                    self.provider.delete_route(&table.id, &route.name)
                })
                .await;
            match result {
                Ok(()) => info!(route = %route.name, "Pruned stale mesh route"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        self.retry
            .run(
                cancel,
                &format!("associate_route_table {}", name_from_id(subnet_id)),
                || self.provider.associate_route_table(subnet_id, &table.id),
            )
            .await?;
        info!(subnet = %subnet_id, table = %table.name, "Route table associated");

        Ok((table.id, wanted))
    }

    /// The route table lives in the guard's boundary so teardown removes it
    async fn ensure_route_table(
        &self,
        cancel: &CancellationToken,
        req: &PeerRequest,
    ) -> Result<CloudResource> {
        let guard_network = self
            .retry
            .run(
                cancel,
                &format!("get_network {}", name_from_id(&req.guard_network_id)),
                || self.provider.get_resource_by_id(&req.guard_network_id),
            )
            .await?
            .ok_or_else(|| {
                Error::not_found(ResourceKind::Network, req.guard_network_id.as_str())
            })?;

        let name = req.guard_id.names().route_table;
        let found = self
            .retry
            .run(cancel, &format!("get_route_table {}", name), || {
                self.provider
                    .get_resource(&guard_network.boundary, ResourceKind::RouteTable, &name)
            })
            .await?;
        if let Some(table) = found {
            debug!(table = %name, "Route table already exists");
            return Ok(table);
        }

        let table = self
            .retry
            .run(cancel, &format!("create_route_table {}", name), || {
                self.provider.create_resource(
                    &guard_network.boundary,
                    &name,
                    &guard_network.location,
                    &guard_network.tags,
                    ResourceSpec::RouteTable(RouteTableSpec::default()),
                )
            })
            .await?;
        info!(guard_id = %req.guard_id, table = %table.id, "Created route table");
        Ok(table)
    }

    /// Remove a guard's peering by name; an absent link is success
    ///
    /// The reciprocal link and route-table association with the remote
    /// network are cleaned up best-effort.
    pub async fn unpeer_network(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
        peering_name: &str,
    ) -> Result<()> {
        let names = guard_id.names();
        let network = self
            .retry
            .run(cancel, &format!("get_network {}", names.network), || {
                self.provider
                    .get_resource(&names.boundary, ResourceKind::Network, &names.network)
            })
            .await?;
        let Some(network) = network else {
            debug!(guard_id = %guard_id, "Guard network absent; nothing to unpeer");
            return Ok(());
        };

        let links = self.list_links(cancel, &network.id).await?;
        let Some(link) = links.into_iter().find(|l| l.name == peering_name) else {
            debug!(guard_id = %guard_id, peering = %peering_name, "Peering already absent");
            return Ok(());
        };

        let result = self
            .retry
            .run(cancel, &format!("delete_peering {}", peering_name), || {
                self.provider.delete_peering(&network.id, peering_name)
            })
            .await;
        match result {
            Ok(()) => info!(guard_id = %guard_id, peering = %peering_name, "Deleted peering"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let result = self
            .retry
            .run(cancel, &format!("delete_peering {} (remote)", peering_name), || {
                self.provider.delete_peering(&link.remote_network_id, peering_name)
            })
            .await;
        match result {
            Ok(()) => info!(peering = %peering_name, "Deleted reciprocal peering"),
            Err(e) if e.is_not_found() => {}
            Err(e) if e.is_permission_denied() => {
                warn!(
                    remote = %link.remote_network_id,
                    "No permission to remove the reciprocal link; the remote owner must delete it"
                );
            }
            Err(e) => return Err(e),
        }

        self.detach_route_table(cancel, guard_id, Some(&link.remote_network_id))
            .await
    }

    /// Undo everything peering placed outside the guard's boundary
    ///
    /// Each discovered peering is removed with its reciprocal link, then the
    /// guard's route table is detached from every subnet still using it. The
    /// boundary cannot be deleted while such an association exists.
    pub async fn release_guard(&self, cancel: &CancellationToken, guard: &Guard) -> Result<()> {
        for peering in &guard.peerings {
            self.unpeer_network(cancel, &guard.guard_id, &peering.name)
                .await?;
        }
        self.detach_route_table(cancel, &guard.guard_id, None).await
    }

    /// Dissociate the guard's route table from subnets of `remote_network_id`,
    /// or from every subnet when `None`
    async fn detach_route_table(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
        remote_network_id: Option<&str>,
    ) -> Result<()> {
        let names = guard_id.names();
        let table = self
            .retry
            .run(cancel, &format!("get_route_table {}", names.route_table), || {
                self.provider
                    .get_resource(&names.boundary, ResourceKind::RouteTable, &names.route_table)
            })
            .await?;
        let subnets: Vec<String> = table
            .as_ref()
            .and_then(|t| t.as_route_table())
            .map(|t| {
                t.subnets
                    .iter()
                    .filter(|s| match remote_network_id {
                        Some(remote) => network_id_of_subnet(s)
                            .map(|n| same_id(n, remote))
                            .unwrap_or(false),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for subnet in &subnets {
            let result = self
                .retry
                .run(
                    cancel,
                    &format!("dissociate_route_table {}", name_from_id(subnet)),
                    || self.provider.dissociate_route_table(subnet),
                )
                .await;
            match result {
                Ok(()) => info!(subnet = %subnet, "Route table dissociated"),
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_permission_denied() => {
                    warn!(subnet = %subnet, "No permission to detach the route table")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::model::NetworkInfo;
    use crate::network::NetworkOrchestrator;
    use crate::resource::subnet_id;
    use crate::test_support::{fast_retry, guard_id, network_request};

    struct Fixture {
        cloud: Arc<MemoryCloud>,
        info: NetworkInfo,
        remote: String,
        manager: PeeringManager,
    }

    async fn fixture() -> Fixture {
        let cloud = Arc::new(MemoryCloud::new());
        let info = NetworkOrchestrator::new(cloud.clone(), fast_retry())
            .ensure_network(&CancellationToken::new(), &network_request("guard-a"))
            .await
            .unwrap();
        let remote = cloud.add_network(
            "work-rg",
            "work-vnet",
            "westeurope",
            "10.10.0.0/16",
            &[("default", "10.10.1.0/24")],
        );
        let manager = PeeringManager::new(cloud.clone(), fast_retry());
        Fixture { cloud, info, remote, manager }
    }

    fn request(f: &Fixture, cidrs: &[&str], with_subnet: bool) -> PeerRequest {
        let id = guard_id("guard-a");
        PeerRequest {
            peering_name: peering_name(&id, &f.remote),
            guard_id: id,
            guard_network_id: f.info.network_id.clone(),
            remote_network_id: f.remote.clone(),
            guard_private_ip: f.info.private_ip.clone().unwrap(),
            mesh_cidrs: cidrs.iter().map(|c| c.to_string()).collect(),
            subnet_id: with_subnet.then(|| subnet_id(&f.remote, "default")),
        }
    }

    #[tokio::test]
    async fn test_peer_with_route_propagation() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let req = request(&f, &["10.200.0.0/16"], true);

        let outcome = f.manager.peer_network(&token, &req).await.unwrap();
        assert_eq!(outcome.remote, RemoteLinkStatus::Created);
        assert_eq!(outcome.peering.state, PeeringState::Connected);
        assert_eq!(outcome.routes.len(), 1);
        assert_eq!(outcome.routes[0].address_prefix, "10.200.0.0/16");
        assert_eq!(outcome.routes[0].next_hop_ip, "10.250.0.4");

        let table_id = outcome.peering.route_table_id.unwrap();
        assert!(table_id.contains("/resourceGroups/guard-a-rg/"));
        let table = f.cloud.resource(&table_id).unwrap();
        let table = table.as_route_table().unwrap();
        assert_eq!(table.routes, outcome.routes);
        let subnet = f.cloud.subnet(&subnet_id(&f.remote, "default")).unwrap();
        assert_eq!(subnet.route_table_id.as_deref(), Some(table_id.as_str()));

        let reciprocal = f.cloud.peering(&f.remote, &req.peering_name).unwrap();
        assert_eq!(reciprocal.remote_network_id, f.info.network_id);
        assert_eq!(reciprocal.state, PeeringState::Connected);
    }

    #[tokio::test]
    async fn test_repeer_updates_instead_of_duplicating() {
        let f = fixture().await;
        let token = CancellationToken::new();
        f.manager
            .peer_network(&token, &request(&f, &["10.200.0.0/16", "10.201.0.0/16"], true))
            .await
            .unwrap();
        let outcome = f
            .manager
            .peer_network(&token, &request(&f, &["10.201.0.0/16", "10.202.0.0/16"], true))
            .await
            .unwrap();

        let peerings = f.cloud.resource(&f.info.network_id).unwrap();
        assert_eq!(peerings.as_network().unwrap().peerings.len(), 1);
        assert_eq!(f.cloud.create_count(ResourceKind::RouteTable), 1);

        let table = f.cloud.resource(&outcome.peering.route_table_id.unwrap()).unwrap();
        let mut prefixes: Vec<String> = table
            .as_route_table()
            .unwrap()
            .routes
            .iter()
            .map(|r| r.address_prefix.clone())
            .collect();
        prefixes.sort();
        assert_eq!(prefixes, vec!["10.201.0.0/16", "10.202.0.0/16"]);
    }

    #[tokio::test]
    async fn test_denied_remote_is_pending_not_error() {
        let f = fixture().await;
        f.cloud.deny_peering_on(&f.remote);

        let outcome = f
            .manager
            .peer_network(&CancellationToken::new(), &request(&f, &["10.200.0.0/16"], false))
            .await
            .unwrap();
        assert!(matches!(outcome.remote, RemoteLinkStatus::Pending { .. }));
        assert_eq!(outcome.peering.state, PeeringState::Initiated);
        assert!(outcome.routes.is_empty());
        assert!(outcome.peering.route_table_id.is_none());
    }

    #[tokio::test]
    async fn test_failed_state_readback_propagates() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let req = request(&f, &[], false);
        f.manager.peer_network(&token, &req).await.unwrap();
        f.cloud.fail_next(
            "list_peerings",
            Error::permanent("list_peerings", crate::PermanentReason::Other, "boom"),
        );
        assert!(f.manager.peer_network(&token, &req).await.is_err());
    }

    #[tokio::test]
    async fn test_subnet_must_belong_to_remote() {
        let f = fixture().await;
        let mut req = request(&f, &["10.200.0.0/16"], true);
        req.subnet_id = Some(f.info.subnet_id.clone());

        let err = f
            .manager
            .peer_network(&CancellationToken::new(), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(f.cloud.peering(&f.info.network_id, &req.peering_name).is_none());
    }

    #[tokio::test]
    async fn test_unpeer_removes_both_sides_and_is_idempotent() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let req = request(&f, &["10.200.0.0/16"], true);
        f.manager.peer_network(&token, &req).await.unwrap();

        let id = guard_id("guard-a");
        f.manager.unpeer_network(&token, &id, &req.peering_name).await.unwrap();
        assert!(f.cloud.peering(&f.info.network_id, &req.peering_name).is_none());
        assert!(f.cloud.peering(&f.remote, &req.peering_name).is_none());
        let subnet = f.cloud.subnet(&subnet_id(&f.remote, "default")).unwrap();
        assert!(subnet.route_table_id.is_none());

        f.manager.unpeer_network(&token, &id, &req.peering_name).await.unwrap();
    }

    #[tokio::test]
    async fn test_unpeer_tolerates_denied_remote() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let req = request(&f, &[], false);
        f.manager.peer_network(&token, &req).await.unwrap();
        f.cloud.fail_next(
            "delete_peering",
            Error::not_found("peering", "local"),
        );
        f.cloud.fail_next(
            "delete_peering",
            Error::permanent("delete_peering", crate::PermanentReason::PermissionDenied, "no"),
        );

        f.manager
            .unpeer_network(&token, &guard_id("guard-a"), &req.peering_name)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unpeer_unknown_guard() {
        let f = fixture().await;
        f.manager
            .unpeer_network(&CancellationToken::new(), &guard_id("guard-zzz"), "guard-zzz-peer-x")
            .await
            .unwrap();
    }

    fn add_twin(f: &Fixture) -> String {
        f.cloud.add_network(
            "team-b-rg",
            "work-vnet",
            "westeurope",
            "10.20.0.0/16",
            &[("default", "10.20.1.0/24")],
        )
    }

    fn request_for(f: &Fixture, remote: &str) -> PeerRequest {
        let mut req = request(f, &["10.200.0.0/16"], true);
        req.peering_name = peering_name(&req.guard_id, remote);
        req.remote_network_id = remote.to_string();
        req.subnet_id = Some(subnet_id(remote, "default"));
        req
    }

    #[tokio::test]
    async fn test_same_named_remotes_keep_separate_links() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let twin = add_twin(&f);
        let first = request_for(&f, &f.remote);
        let second = request_for(&f, &twin);
        assert_ne!(first.peering_name, second.peering_name);

        f.manager.peer_network(&token, &first).await.unwrap();
        f.manager.peer_network(&token, &second).await.unwrap();

        let network = f.cloud.resource(&f.info.network_id).unwrap();
        assert_eq!(network.as_network().unwrap().peerings.len(), 2);
        let a = f.cloud.peering(&f.info.network_id, &first.peering_name).unwrap();
        assert_eq!(a.remote_network_id, f.remote);
        let b = f.cloud.peering(&f.info.network_id, &second.peering_name).unwrap();
        assert_eq!(b.remote_network_id, twin);
        assert!(f.cloud.peering(&f.remote, &first.peering_name).is_some());
        assert!(f.cloud.peering(&twin, &second.peering_name).is_some());
    }

    #[tokio::test]
    async fn test_existing_link_to_other_remote_is_not_overwritten() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let twin = add_twin(&f);
        let first = request_for(&f, &f.remote);
        f.manager.peer_network(&token, &first).await.unwrap();

        let mut clash = request_for(&f, &twin);
        clash.peering_name = first.peering_name.clone();
        let err = f.manager.peer_network(&token, &clash).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Permanent {
                reason: PermanentReason::Conflict,
                ..
            }
        ));

        let kept = f.cloud.peering(&f.info.network_id, &first.peering_name).unwrap();
        assert_eq!(kept.remote_network_id, f.remote);
        assert!(f.cloud.peering(&twin, &first.peering_name).is_none());
    }

    #[tokio::test]
    async fn test_name_must_extend_peering_prefix() {
        let f = fixture().await;
        let mut req = request(&f, &["10.200.0.0/16"], false);
        req.peering_name = "guard-a-peerage".to_string();

        let err = f
            .manager
            .peer_network(&CancellationToken::new(), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(f.cloud.peering(&f.info.network_id, "guard-a-peerage").is_none());
    }

    #[tokio::test]
    async fn test_release_guard_clears_remote_side() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let twin = add_twin(&f);
        let mut guard = Guard::new(guard_id("guard-a"));
        for remote in [f.remote.clone(), twin.clone()] {
            let outcome = f
                .manager
                .peer_network(&token, &request_for(&f, &remote))
                .await
                .unwrap();
            guard.peerings.push(outcome.peering);
        }

        f.manager.release_guard(&token, &guard).await.unwrap();

        let network = f.cloud.resource(&f.info.network_id).unwrap();
        assert!(network.as_network().unwrap().peerings.is_empty());
        for (remote, info) in [&f.remote, &twin].into_iter().zip(&guard.peerings) {
            assert!(f.cloud.peering(remote, &info.name).is_none());
            let subnet = f.cloud.subnet(&subnet_id(remote, "default")).unwrap();
            assert!(subnet.route_table_id.is_none());
        }

        f.manager.release_guard(&token, &guard).await.unwrap();
    }

    #[test]
    fn test_peer_request_from_guard() {
        let mut guard = Guard::new(guard_id("guard-a"));
        let remote =
            "/subscriptions/s/resourceGroups/work/providers/Microsoft.Network/virtualNetworks/Work";
        assert!(peer_request(&guard, remote, None).is_err());

        guard.resources.network_id = Some("/x/guard-a-vnet".to_string());
        guard.private_ip = Some("10.250.0.4".to_string());
        guard.mesh_cidrs = vec!["10.200.0.0/16".to_string()];
        let req = peer_request(&guard, remote, None).unwrap();
        assert!(req.peering_name.starts_with("guard-a-peer-work-"));
        assert_eq!(req.peering_name, peering_name(&guard.guard_id, remote));
        assert_eq!(req.mesh_cidrs, guard.mesh_cidrs);
    }
}
