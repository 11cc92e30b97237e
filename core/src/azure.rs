//! Azure integration via the `az` CLI
//!
//! Every call shells out to `az ... --output json`, so the backend works
//! wherever the operator is already logged in. Reads go through
//! `az resource show` and `az graph query`, which both return raw ARM
//! documents; writes use the resource-specific commands.

use crate::provider::{GuardProvider, MachineProvider, ServerInfo, ServerSpec};
use crate::resource::{
    name_from_id, network_id_of_subnet, subnet_id, BoundarySpec, CloudResource, Direction,
    FirewallRule, FirewallSpec, InterfaceSpec, MachineSpec, MachineState, NetworkSpec, PeeringLink,
    PeeringState, ProvisioningState, Protocol, PublicIpSpec, ResourceKind, ResourceSpec, Route,
    RouteTableSpec, SubnetSpec, TagFilter, Tags,
};
use crate::{Error, PermanentReason, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const RESOURCE_GROUP_TYPE: &str = "microsoft.resources/subscriptions/resourcegroups";
const GRAPH_PAGE_SIZE: &str = "1000";

/// ARM resource type for a kind
pub fn arm_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Boundary => "Microsoft.Resources/resourceGroups",
        ResourceKind::Firewall => "Microsoft.Network/networkSecurityGroups",
        ResourceKind::Network => "Microsoft.Network/virtualNetworks",
        ResourceKind::PublicIp => "Microsoft.Network/publicIPAddresses",
        ResourceKind::Interface => "Microsoft.Network/networkInterfaces",
        ResourceKind::RouteTable => "Microsoft.Network/routeTables",
        ResourceKind::Machine => "Microsoft.Compute/virtualMachines",
    }
}

pub fn kind_from_arm_type(value: &str) -> Option<ResourceKind> {
    if value.eq_ignore_ascii_case(RESOURCE_GROUP_TYPE) {
        return Some(ResourceKind::Boundary);
    }
    ResourceKind::ALL
        .into_iter()
        .find(|kind| arm_type(*kind).eq_ignore_ascii_case(value))
}

pub fn boundary_id(subscription: &str, name: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{}", subscription, name)
}

pub fn resource_id(subscription: &str, boundary: &str, kind: ResourceKind, name: &str) -> String {
    if kind == ResourceKind::Boundary {
        return boundary_id(subscription, name);
    }
    format!(
        "{}/providers/{}/{}",
        boundary_id(subscription, boundary),
        arm_type(kind),
        name
    )
}

/// Segment following `key` in a resource id, matched case-insensitively
fn id_segment<'a>(id: &'a str, key: &str) -> Option<&'a str> {
    let mut parts = id.split('/');
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case(key) {
            return parts.next().filter(|s| !s.is_empty());
        }
    }
    None
}

pub fn boundary_of_id(id: &str) -> Option<&str> {
    id_segment(id, "resourceGroups")
}

/// Boundary and name of a network, from its id
fn network_parts(network_id: &str) -> Result<(String, String)> {
    let boundary = boundary_of_id(network_id)
        .ok_or_else(|| Error::validation(format!("Not a network id: {}", network_id)))?;
    Ok((boundary.to_string(), name_from_id(network_id).to_string()))
}

/// Helper to convert Path to &str with proper error handling
fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::validation(format!("Invalid path encoding: {}", path.display())))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn tag_args(tags: &Tags) -> Vec<String> {
    if tags.is_empty() {
        return Vec::new();
    }
    let mut out = vec!["--tags".to_string()];
    out.extend(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
    out
}

// ==================== Error classification ====================

const DENIED_MARKERS: &[&str] = &[
    "authorizationfailed",
    "linkedauthorizationfailed",
    "does not have authorization",
    "forbidden",
    "please run 'az login'",
];
const QUOTA_MARKERS: &[&str] = &[
    "quotaexceeded",
    "operationnotallowed",
    "skunotavailable",
    "countlimitreached",
];
const NOT_FOUND_MARKERS: &[&str] = &["notfound", "could not be found", "was not found"];
const TRANSIENT_MARKERS: &[&str] = &[
    "toomanyrequests",
    "throttl",
    "internalservererror",
    "serviceunavailable",
    "gatewaytimeout",
    "badgateway",
    "timed out",
    "timeout",
    "connection reset",
    "connection aborted",
    "temporarily unavailable",
    "retryableerror",
    "anotheroperationinprogress",
    "operationpreempted",
];
const INVALID_MARKERS: &[&str] = &[
    "invalidparameter",
    "invalidrequest",
    "badrequest",
    "invalidresource",
    "securityruleconflict",
    "netcfginvalid",
    "the following arguments are required",
    "unrecognized arguments",
];
const CONFLICT_MARKERS: &[&str] = &["conflict", "alreadyexists", "inuse"];

/// Map `az` stderr onto the error taxonomy
pub fn classify_error(operation: &str, stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let message = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no error output")
        .trim_start_matches("ERROR:")
        .trim()
        .to_string();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(DENIED_MARKERS) {
        Error::permanent(operation, PermanentReason::PermissionDenied, message)
    } else if has(QUOTA_MARKERS) {
        Error::permanent(operation, PermanentReason::Quota, message)
    } else if has(NOT_FOUND_MARKERS) {
        Error::not_found("resource", operation)
    } else if has(TRANSIENT_MARKERS) {
        Error::transient(operation, message)
    } else if has(INVALID_MARKERS) {
        Error::permanent(operation, PermanentReason::InvalidParameter, message)
    } else if has(CONFLICT_MARKERS) {
        Error::permanent(operation, PermanentReason::Conflict, message)
    } else {
        Error::permanent(operation, PermanentReason::Other, message)
    }
}

fn none_if_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

// ==================== ARM document parsing ====================

/// Nested `properties` of a raw ARM document, or the document itself when
/// the CLI already flattened it
fn props(v: &Value) -> &Value {
    v.get("properties").unwrap_or(v)
}

fn str_at(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn array_at<'a>(v: &'a Value, pointer: &str) -> &'a [Value] {
    v.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_tags(v: &Value) -> Tags {
    v.get("tags")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_subnet(v: &Value) -> Option<SubnetSpec> {
    let p = props(v);
    Some(SubnetSpec {
        id: str_at(v, "/id")?,
        name: str_at(v, "/name")?,
        address_prefix: str_at(p, "/addressPrefix")
            .or_else(|| str_at(p, "/addressPrefixes/0"))
            .unwrap_or_default(),
        firewall_id: str_at(p, "/networkSecurityGroup/id"),
        route_table_id: str_at(p, "/routeTable/id"),
    })
}

/// Allow rules only; deny rules are never written by this crate
fn parse_firewall_rule(v: &Value) -> Option<FirewallRule> {
    let p = props(v);
    let access = str_at(p, "/access").unwrap_or_else(|| "Allow".to_string());
    if !access.eq_ignore_ascii_case("allow") {
        return None;
    }
    Some(FirewallRule {
        name: str_at(v, "/name")?,
        priority: p.get("priority").and_then(Value::as_u64)? as u16,
        protocol: Protocol::from_cloud(&str_at(p, "/protocol").unwrap_or_default()),
        dest_port: str_at(p, "/destinationPortRange").and_then(|r| r.parse::<u16>().ok()),
        direction: Direction::from_cloud(&str_at(p, "/direction").unwrap_or_default()),
    })
}

fn parse_peering(v: &Value) -> Option<PeeringLink> {
    let p = props(v);
    Some(PeeringLink {
        name: str_at(v, "/name")?,
        remote_network_id: str_at(p, "/remoteVirtualNetwork/id")?,
        state: PeeringState::from_cloud_state(&str_at(p, "/peeringState").unwrap_or_default()),
        allow_forwarded_traffic: p
            .get("allowForwardedTraffic")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_route(v: &Value) -> Option<Route> {
    let p = props(v);
    Some(Route {
        name: str_at(v, "/name")?,
        address_prefix: str_at(p, "/addressPrefix")?,
        next_hop_ip: str_at(p, "/nextHopIpAddress").unwrap_or_default(),
    })
}

fn parse_machine_state(v: &Value) -> MachineState {
    let p = props(v);
    if let Some(code) = str_at(p, "/extended/instanceView/powerState/code")
        .or_else(|| str_at(v, "/powerState"))
    {
        return MachineState::from_power_state(&code);
    }
    let provisioning = str_at(p, "/provisioningState").unwrap_or_default();
    match ProvisioningState::from_cloud_state(&provisioning) {
        ProvisioningState::Creating => MachineState::Creating,
        ProvisioningState::Failed => MachineState::Failed,
        _ => MachineState::Unknown,
    }
}

/// Convert a raw ARM document into a provider-neutral resource
///
/// Returns `None` for documents of a type this crate does not manage.
pub fn parse_arm_resource(v: &Value) -> Option<CloudResource> {
    let id = str_at(v, "/id")?;
    let name = str_at(v, "/name")?;
    let kind = kind_from_arm_type(&str_at(v, "/type")?)?;
    let p = props(v);

    let spec = match kind {
        ResourceKind::Boundary => ResourceSpec::Boundary(BoundarySpec {
            provisioning_state: ProvisioningState::from_cloud_state(
                &str_at(p, "/provisioningState").unwrap_or_default(),
            ),
        }),
        ResourceKind::Firewall => ResourceSpec::Firewall(FirewallSpec {
            rules: array_at(p, "/securityRules")
                .iter()
                .filter_map(parse_firewall_rule)
                .collect(),
        }),
        ResourceKind::Network => ResourceSpec::Network(NetworkSpec {
            address_space: array_at(p, "/addressSpace/addressPrefixes")
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect(),
            subnets: array_at(p, "/subnets").iter().filter_map(parse_subnet).collect(),
            peerings: array_at(p, "/virtualNetworkPeerings")
                .iter()
                .filter_map(parse_peering)
                .collect(),
        }),
        ResourceKind::PublicIp => ResourceSpec::PublicIp(PublicIpSpec {
            ip_address: str_at(p, "/ipAddress"),
        }),
        ResourceKind::Interface => {
            let ip_config = array_at(p, "/ipConfigurations").first().map(props);
            ResourceSpec::Interface(InterfaceSpec {
                subnet_id: ip_config
                    .and_then(|c| str_at(c, "/subnet/id"))
                    .unwrap_or_default(),
                public_ip_id: ip_config.and_then(|c| str_at(c, "/publicIPAddress/id")),
                firewall_id: str_at(p, "/networkSecurityGroup/id"),
                private_ip: ip_config.and_then(|c| str_at(c, "/privateIPAddress")),
                ip_forwarding: p
                    .get("enableIPForwarding")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        ResourceKind::RouteTable => ResourceSpec::RouteTable(RouteTableSpec {
            routes: array_at(p, "/routes").iter().filter_map(parse_route).collect(),
            subnets: array_at(p, "/subnets")
                .iter()
                .filter_map(|s| str_at(s, "/id"))
                .collect(),
        }),
        ResourceKind::Machine => ResourceSpec::Machine(MachineSpec {
            size: str_at(p, "/hardwareProfile/vmSize").unwrap_or_default(),
            interface_id: str_at(p, "/networkProfile/networkInterfaces/0/id").unwrap_or_default(),
            state: parse_machine_state(v),
        }),
    };

    let boundary = if kind == ResourceKind::Boundary {
        name.clone()
    } else {
        boundary_of_id(&id).unwrap_or_default().to_string()
    };

    Some(CloudResource {
        location: str_at(v, "/location").unwrap_or_default(),
        tags: parse_tags(v),
        id,
        name,
        boundary,
        spec,
    })
}

// ==================== Argument builders ====================

fn kql_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Resource-graph query for every resource (and resource group) matching `filter`
pub fn build_graph_query(filter: &TagFilter) -> String {
    let conditions: Vec<String> = filter
        .tags
        .iter()
        .map(|(k, v)| format!("tags['{}'] =~ '{}'", kql_escape(k), kql_escape(v)))
        .collect();
    let tag_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" | where {}", conditions.join(" and "))
    };

    let wanted: Vec<ResourceKind> = if filter.kinds.is_empty() {
        ResourceKind::ALL.to_vec()
    } else {
        filter.kinds.clone()
    };
    let resource_types: Vec<String> = wanted
        .iter()
        .filter(|k| **k != ResourceKind::Boundary)
        .map(|k| format!("'{}'", arm_type(*k).to_lowercase()))
        .collect();

    let mut tables = Vec::new();
    if !resource_types.is_empty() {
        tables.push(format!(
            "Resources | where type in~ ({}){}",
            resource_types.join(", "),
            tag_clause
        ));
    }
    if wanted.contains(&ResourceKind::Boundary) {
        tables.push(format!(
            "ResourceContainers | where type =~ '{}'{}",
            RESOURCE_GROUP_TYPE, tag_clause
        ));
    }

    let body = match tables.as_slice() {
        [single] => single.clone(),
        [first, second] => format!("{} | union ({})", first, second),
        _ => String::new(),
    };
    format!(
        "{} | project id, name, type, location, tags, properties | order by id asc",
        body
    )
}

pub fn build_rule_args(firewall_id: &str, rule: &FirewallRule) -> Result<Vec<String>> {
    let boundary = boundary_of_id(firewall_id)
        .ok_or_else(|| Error::validation(format!("Not a firewall id: {}", firewall_id)))?;
    let port = rule
        .dest_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "*".to_string());

    let mut out = args(&["network", "nsg", "rule", "create"]);
    out.extend([
        "--resource-group".to_string(),
        boundary.to_string(),
        "--nsg-name".to_string(),
        name_from_id(firewall_id).to_string(),
        "--name".to_string(),
        rule.name.clone(),
        "--priority".to_string(),
        rule.priority.to_string(),
        "--protocol".to_string(),
        rule.protocol.as_str().to_string(),
        "--direction".to_string(),
        rule.direction.as_str().to_string(),
        "--access".to_string(),
        "Allow".to_string(),
        "--source-address-prefixes".to_string(),
        "*".to_string(),
        "--destination-port-ranges".to_string(),
        port,
    ]);
    Ok(out)
}

pub fn build_vm_create_args(spec: &ServerSpec, custom_data: &Path) -> Result<Vec<String>> {
    let mut out = args(&["vm", "create"]);
    out.extend([
        "--resource-group".to_string(),
        spec.boundary.clone(),
        "--name".to_string(),
        spec.name.clone(),
        "--location".to_string(),
        spec.location.clone(),
        "--size".to_string(),
        spec.size.clone(),
        "--image".to_string(),
        spec.image.clone(),
        "--admin-username".to_string(),
        spec.admin_username.clone(),
        "--nics".to_string(),
        spec.interface_id.clone(),
        "--custom-data".to_string(),
        path_to_str(custom_data)?.to_string(),
    ]);
    match &spec.ssh_public_key {
        Some(key) => out.extend(["--ssh-key-values".to_string(), key.clone()]),
        None => out.push("--generate-ssh-keys".to_string()),
    }
    out.extend(tag_args(&spec.tags));
    Ok(out)
}

pub fn build_route_args(route_table_id: &str, route: &Route) -> Result<Vec<String>> {
    let boundary = boundary_of_id(route_table_id)
        .ok_or_else(|| Error::validation(format!("Not a route table id: {}", route_table_id)))?;
    let mut out = args(&["network", "route-table", "route", "create"]);
    out.extend([
        "--resource-group".to_string(),
        boundary.to_string(),
        "--route-table-name".to_string(),
        name_from_id(route_table_id).to_string(),
        "--name".to_string(),
        route.name.clone(),
        "--address-prefix".to_string(),
        route.address_prefix.clone(),
        "--next-hop-type".to_string(),
        "VirtualAppliance".to_string(),
        "--next-hop-ip-address".to_string(),
        route.next_hop_ip.clone(),
    ]);
    Ok(out)
}

// ==================== Command execution ====================

/// Output from a command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    skip_token: Option<String>,
}

/// Backend driving the Azure CLI
#[derive(Debug)]
pub struct AzureCli {
    binary: String,
    subscription: Option<String>,
    subscription_id: OnceCell<String>,
}

impl AzureCli {
    pub fn new(binary: impl Into<String>, subscription: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            subscription,
            subscription_id: OnceCell::new(),
        }
    }

    /// Run `az` with the given arguments and capture output
    pub async fn run_cmd(&self, args: &[String]) -> Result<CommandOutput> {
        debug!(cmd = %self.binary, args = %args.join(" "), "Running command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CommandNotFound(self.binary.clone())
                } else {
                    Error::Command {
                        cmd: format!("{} {}", self.binary, args.join(" ")),
                        message: e.to_string(),
                    }
                }
            })?;
        Ok(output.into())
    }

    /// Run a scoped `az` command; non-zero exit is classified, stdout returned
    async fn az(&self, operation: &str, mut args: Vec<String>) -> Result<String> {
        if let Some(sub) = &self.subscription {
            let flag = if args.first().map(String::as_str) == Some("graph") {
                "--subscriptions"
            } else {
                "--subscription"
            };
            args.push(flag.to_string());
            args.push(sub.clone());
        }
        args.extend(["--only-show-errors", "--output", "json"].map(String::from));

        let output = self.run_cmd(&args).await?;
        if !output.success() {
            return Err(if output.stderr.trim().is_empty() {
                Error::permanent(
                    operation,
                    PermanentReason::Other,
                    format!("az exited with code {}", output.exit_code),
                )
            } else {
                classify_error(operation, &output.stderr)
            });
        }
        Ok(output.stdout)
    }

    async fn az_json<T: DeserializeOwned>(&self, operation: &str, args: Vec<String>) -> Result<T> {
        let stdout = self.az(operation, args).await?;
        let text = match stdout.trim() {
            "" => "null",
            trimmed => trimmed,
        };
        Ok(serde_json::from_str(text)?)
    }

    // ==================== Prerequisite Checks ====================

    /// Check that `az` and the resource-graph extension are installed
    pub async fn check_prerequisites(&self) -> Result<()> {
        let output = self.run_cmd(&args(&["version", "--output", "json"])).await?;
        if !output.success() {
            return Err(Error::CommandNotFound(format!(
                "{} is not working: {}. Install the Azure CLI from https://aka.ms/installazurecli",
                self.binary,
                output.stderr.trim()
            )));
        }
        let graph = self
            .run_cmd(&args(&["extension", "show", "--name", "resource-graph", "--output", "json"]))
            .await?;
        if !graph.success() {
            return Err(Error::CommandNotFound(
                "az resource-graph extension. Install with: az extension add --name resource-graph"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the CLI is logged in and the subscription is reachable
    pub async fn check_access(&self) -> Result<String> {
        self.subscription_id().await
    }

    async fn subscription_id(&self) -> Result<String> {
        self.subscription_id
            .get_or_try_init(|| async {
                let account: Value =
                    self.az_json("account show", args(&["account", "show"])).await?;
                str_at(&account, "/id")
                    .ok_or_else(|| Error::config("az account show returned no subscription id"))
            })
            .await
            .cloned()
    }

    async fn show_by_id(&self, id: &str) -> Result<Option<CloudResource>> {
        let doc: Option<Value> = none_if_not_found(
            self.az_json(
                &format!("show {}", name_from_id(id)),
                args(&["resource", "show", "--ids", id]),
            )
            .await,
        )?;
        Ok(doc.as_ref().and_then(parse_arm_resource))
    }

    /// Read back a just-created resource
    async fn read_back(
        &self,
        boundary: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<CloudResource> {
        self.get_resource(boundary, kind, name).await?.ok_or_else(|| {
            Error::transient(
                format!("create_{} {}", kind, name),
                "created resource is not visible yet",
            )
        })
    }
}

#[async_trait]
impl GuardProvider for AzureCli {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn get_boundary(&self, name: &str) -> Result<Option<CloudResource>> {
        let doc: Option<Value> = none_if_not_found(
            self.az_json(
                &format!("get_boundary {}", name),
                args(&["group", "show", "--name", name]),
            )
            .await,
        )?;
        Ok(doc.as_ref().and_then(parse_arm_resource))
    }

    async fn create_boundary(
        &self,
        name: &str,
        location: &str,
        tags: &Tags,
    ) -> Result<CloudResource> {
        let operation = format!("create_boundary {}", name);
        let mut cmd = args(&["group", "create", "--name", name, "--location", location]);
        cmd.extend(tag_args(tags));
        let doc: Value = self.az_json(&operation, cmd).await?;
        info!(boundary = %name, location = %location, "Created resource group");
        parse_arm_resource(&doc)
            .ok_or_else(|| Error::transient(operation, "unexpected az group create output"))
    }

    async fn delete_boundary(&self, name: &str) -> Result<()> {
        let exists: bool = self
            .az_json(
                &format!("delete_boundary {}", name),
                args(&["group", "exists", "--name", name]),
            )
            .await?;
        if !exists {
            return Err(Error::not_found(ResourceKind::Boundary, name));
        }
        self.az(
            &format!("delete_boundary {}", name),
            args(&["group", "delete", "--name", name, "--yes"]),
        )
        .await?;
        info!(boundary = %name, "Deleted resource group");
        Ok(())
    }

    async fn get_resource(
        &self,
        boundary: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<CloudResource>> {
        if kind == ResourceKind::Boundary {
            return self.get_boundary(name).await;
        }
        let doc: Option<Value> = none_if_not_found(
            self.az_json(
                &format!("get_{} {}", kind, name),
                args(&[
                    "resource",
                    "show",
                    "--resource-group",
                    boundary,
                    "--name",
                    name,
                    "--resource-type",
                    arm_type(kind),
                ]),
            )
            .await,
        )?;
        Ok(doc.as_ref().and_then(parse_arm_resource))
    }

    async fn get_resource_by_id(&self, id: &str) -> Result<Option<CloudResource>> {
        self.show_by_id(id).await
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
        let operation = format!("create_{} {}", kind, name);
        let base = [
            "--resource-group".to_string(),
            boundary.to_string(),
            "--name".to_string(),
            name.to_string(),
            "--location".to_string(),
            location.to_string(),
        ];

        match &spec {
            ResourceSpec::Boundary(_) | ResourceSpec::Machine(_) => {
                return Err(Error::permanent(
                    operation,
                    PermanentReason::InvalidParameter,
                    "boundaries and machines have dedicated create calls",
                ));
            }
            ResourceSpec::Firewall(_) => {
                let mut cmd = args(&["network", "nsg", "create"]);
                cmd.extend(base);
                cmd.extend(tag_args(tags));
                self.az(&operation, cmd).await?;
            }
            ResourceSpec::Network(network) => {
                let mut cmd = args(&["network", "vnet", "create"]);
                cmd.extend(base);
                cmd.push("--address-prefixes".to_string());
                cmd.extend(network.address_space.iter().cloned());
                cmd.extend(tag_args(tags));
                self.az(&operation, cmd).await?;
            }
            ResourceSpec::PublicIp(_) => {
                let mut cmd = args(&["network", "public-ip", "create"]);
                cmd.extend(base);
                cmd.extend(args(&["--sku", "Standard", "--allocation-method", "Static"]));
                cmd.extend(tag_args(tags));
                self.az(&operation, cmd).await?;
            }
            ResourceSpec::Interface(nic) => {
                let mut cmd = args(&["network", "nic", "create"]);
                cmd.extend(base);
                cmd.extend(["--subnet".to_string(), nic.subnet_id.clone()]);
                if let Some(pip) = &nic.public_ip_id {
                    cmd.extend(["--public-ip-address".to_string(), pip.clone()]);
                }
                if let Some(nsg) = &nic.firewall_id {
                    cmd.extend(["--network-security-group".to_string(), nsg.clone()]);
                }
                if nic.ip_forwarding {
                    cmd.extend(args(&["--ip-forwarding", "true"]));
                }
                cmd.extend(tag_args(tags));
                self.az(&operation, cmd).await?;
            }
            ResourceSpec::RouteTable(_) => {
                let mut cmd = args(&["network", "route-table", "create"]);
                cmd.extend(base);
                cmd.extend(args(&["--disable-bgp-route-propagation", "true"]));
                cmd.extend(tag_args(tags));
                self.az(&operation, cmd).await?;
            }
        }

        // Nested children are separate calls after the parent exists
        let subscription = self.subscription_id().await?;
        let id = resource_id(&subscription, boundary, kind, name);
        match &spec {
            ResourceSpec::Network(network) => {
                for subnet in &network.subnets {
                    self.create_subnet(&id, subnet).await?;
                }
            }
            ResourceSpec::Firewall(firewall) => {
                for rule in &firewall.rules {
                    self.put_firewall_rule(&id, rule).await?;
                }
            }
            ResourceSpec::RouteTable(table) => {
                for route in &table.routes {
                    self.upsert_route(&id, route).await?;
                }
            }
            _ => {}
        }

        info!(kind = %kind, name = %name, boundary = %boundary, "Created resource");
        self.read_back(boundary, kind, name).await
    }

    async fn get_subnet(&self, network_id: &str, name: &str) -> Result<Option<SubnetSpec>> {
        let id = subnet_id(network_id, name);
        let doc: Option<Value> = none_if_not_found(
            self.az_json(
                &format!("get_subnet {}", name),
                args(&["network", "vnet", "subnet", "show", "--ids", &id]),
            )
            .await,
        )?;
        Ok(doc.as_ref().and_then(parse_subnet))
    }

    async fn create_subnet(&self, network_id: &str, subnet: &SubnetSpec) -> Result<SubnetSpec> {
        let (boundary, network) = network_parts(network_id)?;
        let operation = format!("create_subnet {}", subnet.name);
        let mut cmd = args(&[
            "network",
            "vnet",
            "subnet",
            "create",
            "--resource-group",
            &boundary,
            "--vnet-name",
            &network,
            "--name",
            &subnet.name,
            "--address-prefixes",
            &subnet.address_prefix,
        ]);
        if let Some(nsg) = &subnet.firewall_id {
            cmd.extend(["--network-security-group".to_string(), nsg.clone()]);
        }
        if let Some(rt) = &subnet.route_table_id {
            cmd.extend(["--route-table".to_string(), rt.clone()]);
        }
        let doc: Value = self.az_json(&operation, cmd).await?;
        info!(subnet = %subnet.name, network = %network, "Created subnet");
        parse_subnet(&doc).ok_or_else(|| Error::transient(operation, "unexpected subnet output"))
    }

    async fn list_firewall_rules(&self, firewall_id: &str) -> Result<Vec<FirewallRule>> {
        let boundary = boundary_of_id(firewall_id)
            .ok_or_else(|| Error::validation(format!("Not a firewall id: {}", firewall_id)))?;
        let rules: Vec<Value> = self
            .az_json(
                &format!("list_firewall_rules {}", name_from_id(firewall_id)),
                args(&[
                    "network",
                    "nsg",
                    "rule",
                    "list",
                    "--resource-group",
                    boundary,
                    "--nsg-name",
                    name_from_id(firewall_id),
                ]),
            )
            .await?;
        Ok(rules.iter().filter_map(parse_firewall_rule).collect())
    }

    async fn put_firewall_rule(&self, firewall_id: &str, rule: &FirewallRule) -> Result<()> {
        self.az(
            &format!("put_firewall_rule {}", rule.name),
            build_rule_args(firewall_id, rule)?,
        )
        .await?;
        Ok(())
    }

    async fn set_ip_forwarding(&self, interface_id: &str, enabled: bool) -> Result<()> {
        self.az(
            &format!("set_ip_forwarding {}", name_from_id(interface_id)),
            args(&[
                "network",
                "nic",
                "update",
                "--ids",
                interface_id,
                "--ip-forwarding",
                if enabled { "true" } else { "false" },
            ]),
        )
        .await?;
        Ok(())
    }

    async fn query_tagged(&self, filter: &TagFilter) -> Result<Vec<CloudResource>> {
        let query = build_graph_query(filter);
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;

        loop {
            let mut cmd = args(&["graph", "query", "-q", &query, "--first", GRAPH_PAGE_SIZE]);
            if let Some(token) = &skip_token {
                cmd.extend(["--skip-token".to_string(), token.clone()]);
            }
            let page: GraphPage = self.az_json("query_tagged", cmd).await?;
            rows.extend(page.data);
            match page.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => break,
            }
        }

        debug!(rows = rows.len(), "Resource graph query returned");
        Ok(rows.iter().filter_map(parse_arm_resource).collect())
    }

    async fn list_peerings(&self, network_id: &str) -> Result<Vec<PeeringLink>> {
        let (boundary, network) = network_parts(network_id)?;
        let links: Vec<Value> = self
            .az_json(
                &format!("list_peerings {}", network),
                args(&[
                    "network",
                    "vnet",
                    "peering",
                    "list",
                    "--resource-group",
                    &boundary,
                    "--vnet-name",
                    &network,
                ]),
            )
            .await?;
        Ok(links.iter().filter_map(parse_peering).collect())
    }

    async fn upsert_peering(&self, network_id: &str, link: &PeeringLink) -> Result<PeeringLink> {
        let (boundary, network) = network_parts(network_id)?;
        let operation = format!("upsert_peering {}", link.name);
        let doc: Value = self
            .az_json(
                &operation,
                args(&[
                    "network",
                    "vnet",
                    "peering",
                    "create",
                    "--resource-group",
                    &boundary,
                    "--vnet-name",
                    &network,
                    "--name",
                    &link.name,
                    "--remote-vnet",
                    &link.remote_network_id,
                    "--allow-vnet-access",
                    "true",
                    "--allow-forwarded-traffic",
                    if link.allow_forwarded_traffic { "true" } else { "false" },
                ]),
            )
            .await?;
        info!(peering = %link.name, network = %network, "Upserted peering");
        parse_peering(&doc).ok_or_else(|| Error::transient(operation, "unexpected peering output"))
    }

    async fn delete_peering(&self, network_id: &str, name: &str) -> Result<()> {
        let (boundary, network) = network_parts(network_id)?;
        self.az(
            &format!("delete_peering {}", name),
            args(&[
                "network",
                "vnet",
                "peering",
                "delete",
                "--resource-group",
                &boundary,
                "--vnet-name",
                &network,
                "--name",
                name,
            ]),
        )
        .await?;
        info!(peering = %name, network = %network, "Deleted peering");
        Ok(())
    }

    async fn upsert_route(&self, route_table_id: &str, route: &Route) -> Result<()> {
        self.az(
            &format!("upsert_route {}", route.name),
            build_route_args(route_table_id, route)?,
        )
        .await?;
        Ok(())
    }

    async fn delete_route(&self, route_table_id: &str, name: &str) -> Result<()> {
        let boundary = boundary_of_id(route_table_id)
            .ok_or_else(|| Error::validation(format!("Not a route table id: {}", route_table_id)))?;
        self.az(
            &format!("delete_route {}", name),
            args(&[
                "network",
                "route-table",
                "route",
                "delete",
                "--resource-group",
                boundary,
                "--route-table-name",
                name_from_id(route_table_id),
                "--name",
                name,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn associate_route_table(&self, subnet_id: &str, route_table_id: &str) -> Result<()> {
        if network_id_of_subnet(subnet_id).is_none() {
            return Err(Error::validation(format!("Not a subnet id: {}", subnet_id)));
        }
        self.az(
            &format!("associate_route_table {}", name_from_id(subnet_id)),
            args(&[
                "network",
                "vnet",
                "subnet",
                "update",
                "--ids",
                subnet_id,
                "--route-table",
                route_table_id,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn dissociate_route_table(&self, subnet_id: &str) -> Result<()> {
        self.az(
            &format!("dissociate_route_table {}", name_from_id(subnet_id)),
            args(&[
                "network",
                "vnet",
                "subnet",
                "update",
                "--ids",
                subnet_id,
                "--remove",
                "routeTable",
            ]),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MachineProvider for AzureCli {
    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo> {
        let operation = format!("create_server {}", spec.name);

        // cloud-init goes through a file so it never shows up in process listings
        let tmp_path = std::env::temp_dir().join(format!("{}-cloud-init.yaml", spec.name));
        tokio::fs::write(&tmp_path, &spec.user_data).await?;
        let result: Result<Value> = match build_vm_create_args(spec, &tmp_path) {
            Ok(cmd) => self.az_json(&operation, cmd).await,
            Err(e) => Err(e),
        };
        tokio::fs::remove_file(&tmp_path).await.ok();
        let doc = result?;

        let id = str_at(&doc, "/id")
            .ok_or_else(|| Error::transient(operation.clone(), "az vm create returned no id"))?;
        info!(server = %spec.name, boundary = %spec.boundary, "Created virtual machine");
        Ok(ServerInfo {
            id,
            name: spec.name.clone(),
            boundary: spec.boundary.clone(),
            location: spec.location.clone(),
            state: parse_machine_state(&doc),
            tags: spec.tags.clone(),
        })
    }

    async fn delete_server(&self, boundary: &str, name: &str) -> Result<()> {
        self.az(
            &format!("delete_server {}", name),
            args(&["vm", "delete", "--resource-group", boundary, "--name", name, "--yes"]),
        )
        .await?;
        info!(server = %name, boundary = %boundary, "Deleted virtual machine");
        Ok(())
    }

    async fn list_servers(&self, boundary: &str) -> Result<Vec<ServerInfo>> {
        let vms: Vec<Value> = self
            .az_json(
                &format!("list_servers {}", boundary),
                args(&["vm", "list", "--resource-group", boundary, "--show-details"]),
            )
            .await?;
        Ok(vms
            .iter()
            .filter_map(|vm| {
                Some(ServerInfo {
                    id: str_at(vm, "/id")?,
                    name: str_at(vm, "/name")?,
                    boundary: boundary.to_string(),
                    location: str_at(vm, "/location").unwrap_or_default(),
                    state: parse_machine_state(vm),
                    tags: parse_tags(vm),
                })
            })
            .collect())
    }
}
