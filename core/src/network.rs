//! Network substrate for one guard
//!
//! Every step checks for the resource by its deterministic name before
//! creating it, so a failed or interrupted run can be resumed by calling
//! [`NetworkOrchestrator::ensure_network`] again with the same request.

use crate::model::{
    CleanupOutcome, GuardId, NetworkInfo, NetworkRequest, NsgRuleRequest, ResourceNames,
};
use crate::provider::GuardProvider;
use crate::resource::{
    name_from_id, CloudResource, FirewallRule, FirewallSpec, InterfaceSpec, NetworkSpec,
    ProvisioningState, PublicIpSpec, ResourceKind, ResourceSpec, SubnetSpec, Tags,
};
use crate::retry::RetryPolicy;
use crate::{Error, PermanentReason, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct NetworkOrchestrator {
    provider: Arc<dyn GuardProvider>,
    retry: RetryPolicy,
}

impl NetworkOrchestrator {
    pub fn new(provider: Arc<dyn GuardProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Build whatever is missing of boundary, firewall, network, subnet,
    /// public address and interface, in dependency order
    ///
    /// A failure after the boundary exists is returned as
    /// [`Error::PartialProvision`] listing the ids created so far.
    pub async fn ensure_network(
        &self,
        cancel: &CancellationToken,
        req: &NetworkRequest,
    ) -> Result<NetworkInfo> {
        req.validate()?;
        let names = req.guard_id.names();

        let boundary = self.ensure_boundary(cancel, req, &names).await?;
        let mut existing = vec![boundary.id.clone()];

        match self
            .ensure_substrate(cancel, req, &names, &boundary, &mut existing)
            .await
        {
            Ok(info) => {
                info!(guard_id = %req.guard_id, "Network substrate ready");
                Ok(info)
            }
            Err(e) => Err(Error::partial(&req.guard_id, existing, e)),
        }
    }

    /// The guard's boundary as it currently exists, if at all
    pub async fn find_boundary(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
    ) -> Result<Option<CloudResource>> {
        let boundary = guard_id.names().boundary;
        self.retry
            .run(cancel, &format!("get_boundary {}", boundary), || {
                self.provider.get_boundary(&boundary)
            })
            .await
    }

    async fn ensure_boundary(
        &self,
        cancel: &CancellationToken,
        req: &NetworkRequest,
        names: &ResourceNames,
    ) -> Result<CloudResource> {
        if let Some(boundary) = self.find_boundary(cancel, &req.guard_id).await? {
            let state = boundary
                .as_boundary()
                .map(|b| b.provisioning_state)
                .unwrap_or_default();
            if state == ProvisioningState::Deleting {
                return Err(Error::permanent(
                    format!("ensure_network {}", req.guard_id),
                    PermanentReason::Conflict,
                    format!("boundary {} is being deleted", names.boundary),
                ));
            }
            debug!(boundary = %names.boundary, "Boundary already exists");
            return Ok(boundary);
        }

        let boundary = self
            .retry
            .run(cancel, &format!("create_boundary {}", names.boundary), || {
                self.provider
                    .create_boundary(&names.boundary, &req.location, &req.boundary_tags)
            })
            .await?;
        info!(guard_id = %req.guard_id, boundary = %boundary.id, "Created boundary");
        Ok(boundary)
    }

    async fn ensure_substrate(
        &self,
        cancel: &CancellationToken,
        req: &NetworkRequest,
        names: &ResourceNames,
        boundary: &CloudResource,
        existing: &mut Vec<String>,
    ) -> Result<NetworkInfo> {
        let scope = Scope {
            boundary: &names.boundary,
            location: &req.location,
            tags: &req.tags,
        };

        let firewall = self
            .ensure_resource(
                cancel,
                &scope,
                &names.firewall,
                ResourceSpec::Firewall(FirewallSpec::default()),
            )
            .await?;
        existing.push(firewall.id.clone());

        let subnet_spec = SubnetSpec {
            id: String::new(),
            name: names.subnet.clone(),
            address_prefix: req.subnet_cidr.clone(),
            firewall_id: Some(firewall.id.clone()),
            route_table_id: None,
        };
        let network = self
            .ensure_resource(
                cancel,
                &scope,
                &names.network,
                ResourceSpec::Network(NetworkSpec {
                    address_space: vec![req.network_cidr.clone()],
                    subnets: vec![subnet_spec.clone()],
                    peerings: Vec::new(),
                }),
            )
            .await?;
        existing.push(network.id.clone());

        let subnet = self.ensure_subnet(cancel, &network.id, &subnet_spec).await?;
        existing.push(subnet.id.clone());

        let public_ip = self
            .ensure_resource(
                cancel,
                &scope,
                &names.public_ip,
                ResourceSpec::PublicIp(PublicIpSpec::default()),
            )
            .await?;
        existing.push(public_ip.id.clone());

        let interface = self
            .ensure_resource(
                cancel,
                &scope,
                &names.interface,
                ResourceSpec::Interface(InterfaceSpec {
                    subnet_id: subnet.id.clone(),
                    public_ip_id: Some(public_ip.id.clone()),
                    firewall_id: Some(firewall.id.clone()),
                    private_ip: None,
                    ip_forwarding: false,
                }),
            )
            .await?;
        existing.push(interface.id.clone());

        Ok(NetworkInfo {
            guard_id: req.guard_id.clone(),
            location: req.location.clone(),
            boundary: names.boundary.clone(),
            boundary_id: boundary.id.clone(),
            firewall_id: firewall.id,
            network_id: network.id,
            subnet_id: subnet.id,
            public_ip: public_ip.as_public_ip().and_then(|p| p.ip_address.clone()),
            public_ip_id: public_ip.id,
            private_ip: interface.as_interface().and_then(|n| n.private_ip.clone()),
            interface_id: interface.id,
        })
    }

    /// Get-or-create one resource by name inside the guard's boundary
    async fn ensure_resource(
        &self,
        cancel: &CancellationToken,
        scope: &Scope<'_>,
        name: &str,
        spec: ResourceSpec,
    ) -> Result<CloudResource> {
        let kind = spec.kind();
        let found = self
            .retry
            .run(cancel, &format!("get_{} {}", kind, name), || {
                self.provider.get_resource(scope.boundary, kind, name)
            })
            .await?;
        if let Some(resource) = found {
            debug!(kind = %kind, name = %name, "Resource already exists");
            return Ok(resource);
        }

        let resource = self
            .retry
            .run(cancel, &format!("create_{} {}", kind, name), || {
                self.provider.create_resource(
                    scope.boundary,
                    name,
                    scope.location,
                    scope.tags,
                    spec.clone(),
                )
            })
            .await?;
        info!(kind = %kind, id = %resource.id, "Created resource");
        Ok(resource)
    }

    async fn ensure_subnet(
        &self,
        cancel: &CancellationToken,
        network_id: &str,
        spec: &SubnetSpec,
    ) -> Result<SubnetSpec> {
        let found = self
            .retry
            .run(cancel, &format!("get_subnet {}", spec.name), || {
                self.provider.get_subnet(network_id, &spec.name)
            })
            .await?;
        if let Some(subnet) = found {
            debug!(subnet = %spec.name, "Subnet already exists");
            return Ok(subnet);
        }

        let subnet = self
            .retry
            .run(cancel, &format!("create_subnet {}", spec.name), || {
                self.provider.create_subnet(network_id, spec)
            })
            .await?;
        info!(id = %subnet.id, "Created subnet");
        Ok(subnet)
    }

    /// Enable IP forwarding on an interface and confirm it reads back enabled
    ///
    /// Without forwarding the cloud fabric silently drops transit traffic, so
    /// a write that doesn't stick is retried like any transient failure.
    pub async fn configure_nic_forwarding(
        &self,
        cancel: &CancellationToken,
        interface_id: &str,
    ) -> Result<()> {
        let operation = format!("configure_forwarding {}", name_from_id(interface_id));
        self.retry
            .run(cancel, &operation, || async {
                self.provider.set_ip_forwarding(interface_id, true).await?;
                let nic = self
                    .provider
                    .get_resource_by_id(interface_id)
                    .await?
                    .ok_or_else(|| Error::not_found(ResourceKind::Interface, interface_id))?;
                match nic.as_interface() {
                    Some(spec) if spec.ip_forwarding => Ok(()),
                    Some(_) => Err(Error::transient(
                        operation.as_str(),
                        "IP forwarding not reported as enabled yet",
                    )),
                    None => Err(Error::validation(format!(
                        "{} is not a network interface",
                        interface_id
                    ))),
                }
            })
            .await?;

        info!(interface = %name_from_id(interface_id), "IP forwarding enabled and verified");
        Ok(())
    }

    /// Upsert a firewall rule keyed by name
    ///
    /// An identical existing rule is left alone. A different rule already
    /// holding the priority in the same direction is a validation error.
    pub async fn ensure_nsg_rule(
        &self,
        cancel: &CancellationToken,
        firewall_id: &str,
        req: &NsgRuleRequest,
    ) -> Result<FirewallRule> {
        req.validate()?;
        let wanted = req.to_rule();

        let rules = self
            .retry
            .run(cancel, &format!("list_firewall_rules {}", name_from_id(firewall_id)), || {
                self.provider.list_firewall_rules(firewall_id)
            })
            .await?;

        if rules.iter().any(|r| *r == wanted) {
            debug!(rule = %wanted.name, "Firewall rule unchanged");
            return Ok(wanted);
        }

        if let Some(clash) = rules.iter().find(|r| {
            r.name != wanted.name
                && r.priority == wanted.priority
                && r.direction == wanted.direction
        }) {
            return Err(Error::validation(format!(
                "Priority {} ({}) is already held by rule '{}'",
                wanted.priority,
                wanted.direction.as_str(),
                clash.name
            )));
        }

        self.retry
            .run(cancel, &format!("put_firewall_rule {}", wanted.name), || {
                self.provider.put_firewall_rule(firewall_id, &wanted)
            })
            .await?;
        info!(
            rule = %wanted.name,
            priority = wanted.priority,
            port = ?wanted.dest_port,
            "Upserted firewall rule"
        );
        Ok(wanted)
    }

    /// Delete the guard's boundary and everything in it; absent is success
    pub async fn cleanup_network(
        &self,
        cancel: &CancellationToken,
        guard_id: &GuardId,
    ) -> Result<CleanupOutcome> {
        let boundary = guard_id.names().boundary;
        let result = self
            .retry
            .run(cancel, &format!("delete_boundary {}", boundary), || {
                self.provider.delete_boundary(&boundary)
            })
            .await;

        match result {
            Ok(()) => {
                info!(guard_id = %guard_id, boundary = %boundary, "Deleted boundary");
                Ok(CleanupOutcome::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(guard_id = %guard_id, "Boundary already absent");
                Ok(CleanupOutcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }
}

/// Placement shared by every resource of one guard
struct Scope<'a> {
    boundary: &'a str,
    location: &'a str,
    tags: &'a Tags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCloud;
    use crate::model::RuleClass;
    use crate::resource::{Direction, Protocol};
    use crate::test_support::{fast_retry, guard_id, network_request};

    fn orchestrator(cloud: &Arc<MemoryCloud>) -> NetworkOrchestrator {
        NetworkOrchestrator::new(cloud.clone(), fast_retry())
    }

    #[tokio::test]
    async fn test_ensure_network_creates_everything() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let info = orchestrator(&cloud)
            .ensure_network(&token, &network_request("guard-a"))
            .await
            .unwrap();

        assert_eq!(info.boundary, "guard-a-rg");
        assert_eq!(name_from_id(&info.network_id), "guard-a-vnet");
        assert_eq!(name_from_id(&info.subnet_id), "guard-a-subnet");
        assert_eq!(info.private_ip.as_deref(), Some("10.250.0.4"));
        assert!(info.public_ip.is_some());

        let subnet = cloud.subnet(&info.subnet_id).unwrap();
        assert_eq!(subnet.firewall_id.as_deref(), Some(info.firewall_id.as_str()));

        let nic = cloud.resource(&info.interface_id).unwrap();
        let nic = nic.as_interface().unwrap();
        assert_eq!(nic.public_ip_id.as_deref(), Some(info.public_ip_id.as_str()));
        assert!(!nic.ip_forwarding);

        let tagged = cloud.resource(&info.firewall_id).unwrap();
        assert_eq!(tagged.tags.get("guard-id").unwrap(), "guard-a");
    }

    #[tokio::test]
    async fn test_ensure_network_is_idempotent() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let req = network_request("guard-a");

        let first = net.ensure_network(&token, &req).await.unwrap();
        let count = cloud.resource_count();
        let second = net.ensure_network(&token, &req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cloud.resource_count(), count);
        for kind in ResourceKind::ALL {
            assert!(cloud.create_count(kind) <= 1, "{} created twice", kind);
        }
        assert_eq!(cloud.subnet_create_count(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_reports_partial_set_and_resumes() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let req = network_request("guard-a");

        cloud.fail_next(
            "create_public_ip",
            Error::permanent("create_public_ip", PermanentReason::Quota, "limit reached"),
        );
        let err = net.ensure_network(&token, &req).await.unwrap_err();
        match &err {
            Error::PartialProvision { guard_id, existing, source } => {
                assert_eq!(guard_id, "guard-a");
                assert_eq!(existing.len(), 4);
                assert!(existing[0].ends_with("/resourceGroups/guard-a-rg"));
                assert!(matches!(
                    **source,
                    Error::Permanent { reason: PermanentReason::Quota, .. }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }

        let info = net.ensure_network(&token, &req).await.unwrap();
        assert!(info.public_ip.is_some());
        assert_eq!(cloud.create_count(ResourceKind::Network), 1);
        assert_eq!(cloud.create_count(ResourceKind::Firewall), 1);
        assert_eq!(cloud.create_count(ResourceKind::PublicIp), 1);
    }

    #[tokio::test]
    async fn test_resume_recreates_missing_subnet() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let req = network_request("guard-a");

        let info = net.ensure_network(&token, &req).await.unwrap();
        cloud.remove_resource(&info.interface_id);
        let network_id = info.network_id.clone();
        let guard_network = cloud.resource(&network_id).unwrap();
        cloud.remove_resource(&network_id);
        // Re-seed the network without its subnet
        let spec = guard_network.as_network().unwrap();
        cloud.add_network("guard-a-rg", "guard-a-vnet", "westeurope", &spec.address_space[0], &[]);

        let resumed = net.ensure_network(&token, &req).await.unwrap();
        assert_eq!(resumed.subnet_id, info.subnet_id);
        assert_eq!(cloud.subnet_create_count(), 1);
        assert_eq!(cloud.create_count(ResourceKind::Interface), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        cloud.fail_next("create_network", Error::transient("create_network", "429"));
        cloud.fail_next("create_network", Error::transient("create_network", "503"));

        let info = orchestrator(&cloud)
            .ensure_network(&token, &network_request("guard-a"))
            .await
            .unwrap();
        assert!(cloud.resource(&info.network_id).is_some());
    }

    #[tokio::test]
    async fn test_invalid_request_creates_nothing() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let mut req = network_request("guard-a");
        req.subnet_cidr = "10.99.0.0/26".to_string();

        let err = orchestrator(&cloud).ensure_network(&token, &req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_deleting_boundary_is_not_reused() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let req = network_request("guard-a");
        net.ensure_network(&token, &req).await.unwrap();
        cloud.set_boundary_state("guard-a-rg", ProvisioningState::Deleting);

        let err = net.ensure_network(&token, &req).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Permanent { reason: PermanentReason::Conflict, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        token.cancel();

        let err = orchestrator(&cloud)
            .ensure_network(&token, &network_request("guard-a"))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cloud.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_forwarding_is_verified() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let info = net.ensure_network(&token, &network_request("guard-a")).await.unwrap();

        cloud.stall_forwarding(2);
        net.configure_nic_forwarding(&token, &info.interface_id).await.unwrap();
        let nic = cloud.resource(&info.interface_id).unwrap();
        assert!(nic.as_interface().unwrap().ip_forwarding);
    }

    #[tokio::test]
    async fn test_forwarding_that_never_sticks_fails() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let info = orchestrator(&cloud)
            .ensure_network(&token, &network_request("guard-a"))
            .await
            .unwrap();

        cloud.stall_forwarding(10);
        let err = NetworkOrchestrator::new(cloud.clone(), RetryPolicy::no_retry())
            .configure_nic_forwarding(&token, &info.interface_id)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_forwarding_on_missing_interface() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let nic = concat!(
            "/subscriptions/x/resourceGroups/rg",
            "/providers/Microsoft.Network/networkInterfaces/nic"
        );
        let err = orchestrator(&cloud)
            .configure_nic_forwarding(&token, nic)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_nsg_rule_upsert_is_idempotent() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let info = net.ensure_network(&token, &network_request("guard-a")).await.unwrap();

        let rule = NsgRuleRequest::wireguard(51820);
        net.ensure_nsg_rule(&token, &info.firewall_id, &rule).await.unwrap();
        net.ensure_nsg_rule(&token, &info.firewall_id, &rule).await.unwrap();

        let rules = cloud.resource(&info.firewall_id).unwrap().as_firewall().unwrap().rules.clone();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].dest_port, Some(51820));

        // Same name, new port: updated in place
        net.ensure_nsg_rule(&token, &info.firewall_id, &NsgRuleRequest::wireguard(51821))
            .await
            .unwrap();
        let rules = cloud.resource(&info.firewall_id).unwrap().as_firewall().unwrap().rules.clone();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].dest_port, Some(51821));
    }

    #[tokio::test]
    async fn test_nsg_rule_priority_collision() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        let info = net.ensure_network(&token, &network_request("guard-a")).await.unwrap();
        net.ensure_nsg_rule(&token, &info.firewall_id, &NsgRuleRequest::wireguard(51820))
            .await
            .unwrap();

        let other = NsgRuleRequest {
            rule_name: "allow-wireguard-alt".to_string(),
            priority: 100,
            protocol: Protocol::Udp,
            dest_port: Some(51900),
            direction: Direction::Inbound,
            class: RuleClass::WireGuard,
        };
        let err = net.ensure_nsg_rule(&token, &info.firewall_id, &other).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Outbound at the same priority is a different slot
        let outbound = NsgRuleRequest {
            direction: Direction::Outbound,
            ..other.clone()
        };
        net.ensure_nsg_rule(&token, &info.firewall_id, &outbound).await.unwrap();

        let out_of_band = NsgRuleRequest {
            priority: 150,
            class: RuleClass::Mesh,
            ..other
        };
        let err = net.ensure_nsg_rule(&token, &info.firewall_id, &out_of_band).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        let net = orchestrator(&cloud);
        net.ensure_network(&token, &network_request("guard-a")).await.unwrap();

        let id = guard_id("guard-a");
        assert_eq!(net.cleanup_network(&token, &id).await.unwrap(), CleanupOutcome::Deleted);
        assert_eq!(cloud.resource_count(), 0);
        assert_eq!(
            net.cleanup_network(&token, &id).await.unwrap(),
            CleanupOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_cleanup_surfaces_other_errors() {
        let cloud = Arc::new(MemoryCloud::new());
        let token = CancellationToken::new();
        cloud.fail_next(
            "delete_boundary",
            Error::permanent("delete_boundary", PermanentReason::PermissionDenied, "no"),
        );
        let err = orchestrator(&cloud)
            .cleanup_network(&token, &guard_id("guard-a"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }
}
