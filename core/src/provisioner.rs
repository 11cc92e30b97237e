//! Guard lifecycle: provision and teardown
//!
//! A guard moves `Absent -> Provisioning -> Active | PartiallyCreated` and
//! back to `Absent` through teardown. Nothing is rolled back on failure: the
//! resources created so far stay discoverable until the operator retries
//! with the same id or tears the guard down. Teardown deletes the isolation
//! boundary, which takes every resource inside it along.

use crate::cloud_init::CloudInitBuilder;
use crate::config::GuardConfig;
use crate::discovery::{derive_status, Discovery};
use crate::model::{
    normalize_mesh_cidrs, CleanupOutcome, CreateGuardRequest, Guard, GuardId, GuardResources,
    NetworkInfo, NetworkRequest, NsgRuleRequest,
};
use crate::network::NetworkOrchestrator;
use crate::peering::PeeringManager;
use crate::provider::{GuardProvider, MachineProvider, ServerInfo, ServerSpec};
use crate::resource::{ProvisioningState, Tags};
use crate::retry::RetryPolicy;
use crate::tags::{validate_mesh_tag, validate_metadata, TagScheme};
use crate::wireguard::WireGuardConf;
use crate::{Error, PermanentReason, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Front door for guard lifecycle operations
pub struct GuardProvisioner {
    config: GuardConfig,
    tags: TagScheme,
    network: NetworkOrchestrator,
    discovery: Discovery,
    peering: PeeringManager,
    machines: Arc<dyn MachineProvider>,
    retry: RetryPolicy,
}

/// Everything a request resolves to before the first cloud call
struct Plan {
    guard_id: GuardId,
    conf: WireGuardConf,
    mesh_cidrs: Vec<String>,
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    location_given: bool,
    port: u16,
    network: NetworkRequest,
}

impl Plan {
    fn retag(&mut self, tags: &TagScheme) {
        self.network.tags = tags.guard_tags(&self.guard_id, &self.mesh_cidrs);
        self.network.boundary_tags =
            tags.boundary_tags(&self.guard_id, &self.mesh_cidrs, self.created_at, &self.metadata);
    }
}

impl GuardProvisioner {
    pub fn new(
        config: GuardConfig,
        provider: Arc<dyn GuardProvider>,
        machines: Arc<dyn MachineProvider>,
    ) -> Self {
        let tags = config.tag_scheme();
        let retry = config.retry.clone();
        Self {
            network: NetworkOrchestrator::new(provider.clone(), retry.clone()),
            discovery: Discovery::new(provider.clone(), tags.clone(), retry.clone())
                .with_concurrency(config.discovery.concurrency),
            peering: PeeringManager::new(provider, retry.clone()),
            config,
            tags,
            machines,
            retry,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkOrchestrator {
        &self.network
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn peering(&self) -> &PeeringManager {
        &self.peering
    }

    /// Create a new guard under a freshly generated id
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        req: CreateGuardRequest,
    ) -> Result<Guard> {
        self.provision_with_id(cancel, GuardId::generate(), req).await
    }

    /// Provision under a known id
    ///
    /// Every step is idempotent, so calling this again with the id of a
    /// partially created guard resumes where the previous attempt stopped.
    /// A resume keeps what the boundary recorded: an empty mesh set, metadata
    /// or location adopts the recorded value, a different one is rejected.
    pub async fn provision_with_id(
        &self,
        cancel: &CancellationToken,
        guard_id: GuardId,
        req: CreateGuardRequest,
    ) -> Result<Guard> {
        let mut plan = self.plan(guard_id, req)?;
        self.adopt_existing(cancel, &mut plan).await?;
        let guard_id = plan.guard_id.clone();
        info!(
            guard_id = %guard_id,
            location = %plan.network.location,
            mesh_cidrs = ?plan.mesh_cidrs,
            port = plan.port,
            "Provisioning guard"
        );

        let info = self.network.ensure_network(cancel, &plan.network).await?;
        let existing = vec![
            info.boundary_id.clone(),
            info.firewall_id.clone(),
            info.network_id.clone(),
            info.subnet_id.clone(),
            info.public_ip_id.clone(),
            info.interface_id.clone(),
        ];

        let server = match self.finish(cancel, &plan, &info).await {
            Ok(server) => server,
            Err(e) => {
                warn!(
                    guard_id = %guard_id,
                    error = %e,
                    "Provisioning stopped; guard left partially created"
                );
                return Err(Error::partial(&guard_id, existing, e));
            }
        };

        let guard = self.assemble(&plan, &info, &server);
        info!(
            guard_id = %guard_id,
            status = %guard.status,
            public_ip = ?guard.public_ip,
            "Guard provisioned"
        );
        Ok(guard)
    }

    /// Align a plan with the boundary left by an earlier attempt
    async fn adopt_existing(&self, cancel: &CancellationToken, plan: &mut Plan) -> Result<()> {
        let Some(boundary) = self.network.find_boundary(cancel, &plan.guard_id).await? else {
            return Ok(());
        };
        let recorded = self
            .tags
            .decode(&boundary.tags)
            .filter(|d| d.guard_id == plan.guard_id)
            .ok_or_else(|| {
                Error::permanent(
                    format!("provision {}", plan.guard_id),
                    PermanentReason::Conflict,
                    format!("boundary {} exists but is not managed as this guard", boundary.name),
                )
            })?;

        if plan.mesh_cidrs.is_empty() {
            plan.mesh_cidrs = recorded.mesh_cidrs.clone();
        }
        let mut requested = plan.mesh_cidrs.clone();
        let mut existing = recorded.mesh_cidrs.clone();
        requested.sort();
        existing.sort();
        if requested != existing {
            return Err(Error::validation(format!(
                "Guard {} was created with mesh CIDRs [{}]; resume with the same set",
                plan.guard_id,
                recorded.mesh_cidrs.join(", ")
            )));
        }

        if plan.metadata.is_empty() {
            plan.metadata = recorded.metadata.clone();
        }
        if plan.metadata != recorded.metadata {
            return Err(Error::validation(format!(
                "Guard {} was created with different metadata; resume with the same values",
                plan.guard_id
            )));
        }

        if !boundary.location.eq_ignore_ascii_case(&plan.network.location) {
            if plan.location_given {
                return Err(Error::validation(format!(
                    "Guard {} lives in {}, not {}",
                    plan.guard_id, boundary.location, plan.network.location
                )));
            }
            plan.network.location = boundary.location.clone();
        }

        debug!(guard_id = %plan.guard_id, "Resuming against existing boundary");
        plan.mesh_cidrs = recorded.mesh_cidrs;
        if let Some(created_at) = recorded.created_at {
            plan.created_at = created_at;
        }
        plan.retag(&self.tags);
        Ok(())
    }

    fn plan(&self, guard_id: GuardId, req: CreateGuardRequest) -> Result<Plan> {
        let conf = WireGuardConf::new(req.wireguard_conf)?;
        let mesh_cidrs = normalize_mesh_cidrs(&req.mesh_cidrs)?;
        validate_mesh_tag(&mesh_cidrs)?;
        validate_metadata(&req.metadata)?;

        let given = req
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let location_given = given.is_some();
        let location = given.unwrap_or_else(|| self.config.cloud.default_location.clone());
        let port = conf.listen_port().unwrap_or(self.config.wireguard.port);
        debug!(
            tunnel_address = ?conf.interface_address(),
            ?conf,
            "WireGuard configuration accepted"
        );

        let network = NetworkRequest {
            guard_id: guard_id.clone(),
            location,
            network_cidr: req
                .network_cidr
                .unwrap_or_else(|| self.config.network.network_cidr.clone()),
            subnet_cidr: req
                .subnet_cidr
                .unwrap_or_else(|| self.config.network.subnet_cidr.clone()),
            tags: Tags::new(),
            boundary_tags: Tags::new(),
        };

        let mut plan = Plan {
            guard_id,
            conf,
            mesh_cidrs,
            metadata: req.metadata,
            created_at: Utc::now(),
            location_given,
            port,
            network,
        };
        plan.retag(&self.tags);
        plan.network.validate()?;
        Ok(plan)
    }

    /// Forwarding, the tunnel's firewall rule, then the machine itself
    async fn finish(
        &self,
        cancel: &CancellationToken,
        plan: &Plan,
        info: &NetworkInfo,
    ) -> Result<ServerInfo> {
        self.network
            .configure_nic_forwarding(cancel, &info.interface_id)
            .await?;
        self.network
            .ensure_nsg_rule(cancel, &info.firewall_id, &NsgRuleRequest::wireguard(plan.port))
            .await?;

        let names = plan.guard_id.names();
        let spec = ServerSpec {
            name: names.machine,
            boundary: info.boundary.clone(),
            location: info.location.clone(),
            size: self.config.machine.size.clone(),
            image: self.config.machine.image.clone(),
            admin_username: self.config.machine.admin_username.clone(),
            ssh_public_key: self.config.machine.ssh_public_key.clone(),
            interface_id: info.interface_id.clone(),
            user_data: CloudInitBuilder::generate(
                plan.guard_id.as_str(),
                &plan.conf,
                &plan.mesh_cidrs,
            ),
            tags: plan.network.tags.clone(),
        };

        let server = self
            .retry
            .run(cancel, &format!("create_server {}", spec.name), || {
                self.machines.create_server(&spec)
            })
            .await?;
        info!(guard_id = %plan.guard_id, machine = %server.id, "Machine created");
        Ok(server)
    }

    /// The view of a guard that was just built, without another scan
    fn assemble(&self, plan: &Plan, info: &NetworkInfo, server: &ServerInfo) -> Guard {
        let mut guard = Guard::new(plan.guard_id.clone());
        guard.location = Some(info.location.clone());
        guard.boundary = info.boundary.clone();
        guard.public_ip = info.public_ip.clone();
        guard.private_ip = info.private_ip.clone();
        guard.resources = GuardResources {
            boundary_id: Some(info.boundary_id.clone()),
            firewall_id: Some(info.firewall_id.clone()),
            network_id: Some(info.network_id.clone()),
            subnet_id: Some(info.subnet_id.clone()),
            public_ip_id: Some(info.public_ip_id.clone()),
            interface_id: Some(info.interface_id.clone()),
            machine_id: Some(server.id.clone()),
            route_table_id: None,
        };
        guard.mesh_cidrs = plan.mesh_cidrs.clone();
        guard.wireguard_port = Some(plan.port);
        guard.ip_forwarding = true;
        guard.machine_state = Some(server.state);
        guard.created_at = self
            .tags
            .decode(&plan.network.boundary_tags)
            .and_then(|d| d.created_at);
        guard.metadata = plan.metadata.clone();
        guard.status = derive_status(&guard, Some(ProvisioningState::Succeeded));
        guard
    }

    /// Delete a guard and everything it owns
    ///
    /// An id with no discoverable resources is `NotFound`; a guard whose
    /// boundary vanished between lookup and delete is reported as absent.
    /// Peerings and route-table associations that reach outside the boundary
    /// are removed first since the cascading delete cannot take them along.
    pub async fn teardown(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
    ) -> Result<CleanupOutcome> {
        let guard = self.discovery.get_guard(cancel, guard_id).await?;
        info!(
            guard_id = %guard_id,
            status = %guard.status,
            resources = guard.resources.existing().len(),
            peerings = guard.peerings.len(),
            "Tearing down guard"
        );
        self.peering.release_guard(cancel, &guard).await?;
        if guard.resources.machine_id.is_some() {
            self.release_machines(cancel, &guard.boundary).await?;
        }
        self.network.cleanup_network(cancel, guard_id).await
    }

    /// Delete the machines in `boundary` ahead of the cascading boundary delete
    async fn release_machines(&self, cancel: &CancellationToken, boundary: &str) -> Result<()> {
        let servers = match self
            .retry
            .run(cancel, &format!("list_servers {}", boundary), || {
                self.machines.list_servers(boundary)
            })
            .await
        {
            Ok(servers) => servers,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        for server in servers {
            let deleted = self
                .retry
                .run(cancel, &format!("delete_server {}", server.name), || {
                    self.machines.delete_server(boundary, &server.name)
                })
                .await;
            match deleted {
                Ok(()) => info!(machine = %server.id, "Machine deleted"),
                Err(e) if e.is_not_found() => {
                    debug!(machine = %server.id, "Machine already gone")
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
    use crate::model::GuardStatus;
    use crate::peering::peer_request;
    use crate::resource::{subnet_id, ResourceKind};
    use crate::test_support::fast_retry;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    const CONF: &str = "[Interface]\nPrivateKey = aGVsbG8=\nAddress = 10.200.0.1/16\n\n\
                        [Peer]\nPublicKey = d29ybGQ=\nAllowedIPs = 10.200.0.0/16\n";

    fn provisioner(cloud: &Arc<MemoryCloud>) -> GuardProvisioner {
        let mut config = GuardConfig::default();
        config.retry = fast_retry();
        GuardProvisioner::new(config, cloud.clone(), cloud.clone())
    }

    fn request(cidrs: &[&str]) -> CreateGuardRequest {
        CreateGuardRequest::new(CONF)
            .with_location("westeurope")
            .with_mesh_cidrs(cidrs.iter().copied())
    }

    #[tokio::test]
    async fn test_provision_returns_active_guard() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();

        let guard = p.provision(&token, request(&["10.200.0.0/16"])).await.unwrap();
        assert_eq!(guard.status, GuardStatus::Active);
        assert_eq!(guard.wireguard_port, Some(51820));
        assert_eq!(guard.mesh_cidrs, vec!["10.200.0.0/16"]);
        assert!(guard.public_ip.is_some());
        assert_eq!(guard.private_ip.as_deref(), Some("10.250.0.4"));
        assert!(guard.ip_forwarding);
        assert!(guard.created_at.is_some());

        // The live view agrees with what provision returned
        let found = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
        assert_eq!(found.status, GuardStatus::Active);
        assert_eq!(found.public_ip, guard.public_ip);
        assert_eq!(found.private_ip, guard.private_ip);
        assert_eq!(found.wireguard_port, guard.wireguard_port);
        assert_eq!(found.resources, guard.resources);
    }

    #[tokio::test]
    async fn test_mesh_cidrs_round_trip_through_discovery() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let sets: [&[&str]; 3] = [
            &[],
            &["10.200.0.0/16"],
            &["10.202.0.0/16", "10.201.0.0/16", "fd00:200::/48"],
        ];

        for set in sets {
            let guard = p.provision(&token, request(set)).await.unwrap();
            let found = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
            let mut want: Vec<String> = set.iter().map(|c| c.to_string()).collect();
            let mut got = found.mesh_cidrs.clone();
            want.sort();
            got.sort();
            assert_eq!(got, want);
        }
    }

    #[tokio::test]
    async fn test_teardown_then_get_is_not_found() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let guard = p.provision(&token, request(&["10.200.0.0/16"])).await.unwrap();

        let outcome = p.teardown(&token, &guard.guard_id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Deleted);
        assert_eq!(cloud.resource_count(), 0);

        let err = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap_err();
        assert!(err.is_not_found());
        let err = p.teardown(&token, &guard.guard_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_teardown_releases_machine_before_boundary() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let guard = p.provision(&token, request(&[])).await.unwrap();
        let machine_id = guard.resources.machine_id.clone().unwrap();
        cloud.fail_next(
            "delete_boundary",
            Error::permanent("delete_boundary", PermanentReason::PermissionDenied, "locked"),
        );

        let err = p.teardown(&token, &guard.guard_id).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(cloud.resource(&machine_id).is_none());

        // The rest is still there and a second attempt finishes the job
        let found = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
        assert!(found.resources.machine_id.is_none());
        assert_eq!(
            p.teardown(&token, &guard.guard_id).await.unwrap(),
            CleanupOutcome::Deleted
        );
        assert_eq!(cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_removes_peerings_outside_boundary() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let guard = p.provision(&token, request(&["10.200.0.0/16"])).await.unwrap();
        let remote = cloud.add_network(
            "work-rg",
            "work-vnet",
            "westeurope",
            "10.10.0.0/16",
            &[("default", "10.10.1.0/24")],
        );
        let workload_subnet = subnet_id(&remote, "default");
        let guard = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
        let req = peer_request(&guard, &remote, Some(workload_subnet.clone())).unwrap();
        p.peering().peer_network(&token, &req).await.unwrap();
        assert!(cloud.subnet(&workload_subnet).unwrap().route_table_id.is_some());

        let outcome = p.teardown(&token, &guard.guard_id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Deleted);
        assert!(!cloud.boundary_exists(&guard.boundary));
        assert!(cloud.peering(&remote, &req.peering_name).is_none());
        assert!(cloud.subnet(&workload_subnet).unwrap().route_table_id.is_none());
        assert!(cloud.resource(&remote).is_some());
    }

    #[tokio::test]
    async fn test_resume_must_match_recorded_guard() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let id = GuardId::parse("guard-resume").unwrap();
        cloud.fail_next(
            "create_server",
            Error::permanent("create_server", PermanentReason::Quota, "cores exhausted"),
        );
        let first = request(&["10.200.0.0/16", "10.201.0.0/16"]).with_metadata("owner", "netops");
        assert!(p.provision_with_id(&token, id.clone(), first).await.is_err());
        let before = p.discovery().get_guard(&token, &id).await.unwrap();
        let resources = cloud.resource_count();

        let changed = request(&["10.77.0.0/16"]);
        let err = p.provision_with_id(&token, id.clone(), changed).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let relabelled =
            request(&["10.201.0.0/16", "10.200.0.0/16"]).with_metadata("owner", "someone-else");
        let err = p.provision_with_id(&token, id.clone(), relabelled).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let moved = request(&[]).with_location("northeurope");
        let err = p.provision_with_id(&token, id.clone(), moved).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cloud.resource_count(), resources);
        assert_eq!(cloud.create_count(ResourceKind::Machine), 0);

        // Same set in another order, metadata left out: adopts the record
        let guard = p
            .provision_with_id(&token, id.clone(), request(&["10.201.0.0/16", "10.200.0.0/16"]))
            .await
            .unwrap();
        assert_eq!(guard.status, GuardStatus::Active);
        let found = p.discovery().get_guard(&token, &id).await.unwrap();
        assert_eq!(guard.mesh_cidrs, found.mesh_cidrs);
        assert_eq!(guard.metadata, found.metadata);
        assert_eq!(guard.created_at, found.created_at);
        assert_eq!(found.created_at, before.created_at);
        assert_eq!(found.mesh_cidrs, before.mesh_cidrs);
    }

    #[tokio::test]
    async fn test_teardown_unknown_id() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let id = GuardId::parse("guard-nope").unwrap();
        let err = p.teardown(&CancellationToken::new(), &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_machine_failure_leaves_discoverable_partial_guard() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        cloud.fail_next(
            "create_server",
            Error::permanent("create_server", PermanentReason::Quota, "cores exhausted"),
        );

        let id = GuardId::parse("guard-partial").unwrap();
        let err = p
            .provision_with_id(&token, id.clone(), request(&["10.200.0.0/16"]))
            .await
            .unwrap_err();
        match &err {
            Error::PartialProvision { guard_id, existing, source } => {
                assert_eq!(guard_id, "guard-partial");
                assert_eq!(existing.len(), 6);
                assert!(matches!(
                    **source,
                    Error::Permanent { reason: PermanentReason::Quota, .. }
                ));
            }
            other => panic!("expected PartialProvision, got {other:?}"),
        }

        let found = p.discovery().get_guard(&token, &id).await.unwrap();
        assert_eq!(found.status, GuardStatus::PartiallyCreated);
        assert!(found.private_ip.is_some());
        assert!(found.resources.machine_id.is_none());
        assert!(found.machine_state.is_none());

        // Retrying in place completes the same guard
        let guard = p
            .provision_with_id(&token, id.clone(), request(&["10.200.0.0/16"]))
            .await
            .unwrap();
        assert_eq!(guard.status, GuardStatus::Active);
        assert_eq!(cloud.create_count(ResourceKind::Network), 1);
        assert_eq!(cloud.create_count(ResourceKind::Machine), 1);
    }

    #[tokio::test]
    async fn test_empty_config_creates_nothing() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let err = p
            .provision(&CancellationToken::new(), CreateGuardRequest::new("  \n"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cloud.resource_count(), 0);

        let err = p
            .provision(&CancellationToken::new(), request(&["10.200.0.1/16"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_port_in_config_wins() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let conf = format!("{}\n[Interface]\nListenPort = 41194\n", "# custom");
        let req = CreateGuardRequest::new(conf).with_location("westeurope");

        let guard = p.provision(&token, req).await.unwrap();
        assert_eq!(guard.wireguard_port, Some(41194));
        let found = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
        assert_eq!(found.wireguard_port, Some(41194));
    }

    #[tokio::test]
    async fn test_machine_boots_with_wireguard_config() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let guard = p
            .provision(&CancellationToken::new(), request(&["10.200.0.0/16"]))
            .await
            .unwrap();

        let machine_id = guard.resources.machine_id.unwrap();
        let user_data = cloud.user_data(&machine_id).unwrap();
        assert!(user_data.starts_with("#cloud-config"));
        assert!(user_data.contains(&STANDARD.encode(CONF)));
        assert!(user_data.contains("ip route replace 10.200.0.0/16 dev wg0"));
    }

    #[tokio::test]
    async fn test_metadata_and_default_location() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        let req = CreateGuardRequest::new(CONF).with_metadata("owner", "netops");

        let guard = p.provision(&token, req).await.unwrap();
        assert_eq!(guard.location.as_deref(), Some("westeurope"));
        let found = p.discovery().get_guard(&token, &guard.guard_id).await.unwrap();
        assert_eq!(found.metadata.get("owner").map(String::as_str), Some("netops"));

        let bad = CreateGuardRequest::new(CONF).with_metadata("no spaces", "x");
        assert!(matches!(p.provision(&token, bad).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_cancelled_provision_creates_nothing() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        token.cancel();

        let err = p.provision(&token, request(&[])).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_list_after_provision() {
        let cloud = Arc::new(MemoryCloud::new());
        let p = provisioner(&cloud);
        let token = CancellationToken::new();
        assert!(p.discovery().list_guards(&token).await.unwrap().is_empty());

        let a = p
            .provision_with_id(&token, GuardId::parse("guard-a").unwrap(), request(&[]))
            .await
            .unwrap();
        let b = p
            .provision_with_id(&token, GuardId::parse("guard-b").unwrap(), request(&[]))
            .await
            .unwrap();
        let listed = p.discovery().list_guards(&token).await.unwrap();
        let ids: Vec<&GuardId> = listed.iter().map(|g| &g.guard_id).collect();
        assert_eq!(ids, vec![&a.guard_id, &b.guard_id]);
        assert!(listed.iter().all(|g| g.status == GuardStatus::Active));
    }
}
