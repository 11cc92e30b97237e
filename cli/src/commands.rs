//! Command implementations for guardctl

use crate::output;
use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use guard_core::{
    peer_request, peering_name, AzureCli, CreateGuardRequest, Error, GuardConfig, GuardId,
    GuardProvisioner, RemoteLinkStatus, WireGuardConf,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared state for one CLI invocation
pub struct Context {
    pub config: GuardConfig,
    pub config_path: PathBuf,
    pub json: bool,
    pub cancel: CancellationToken,
}

pub struct CreateArgs {
    pub wireguard_config: String,
    pub mesh_cidrs: Vec<String>,
    pub location: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub guard_id: Option<String>,
}

/// The Azure CLI backs both the network and the machine capabilities
async fn provisioner(ctx: &Context) -> Result<GuardProvisioner> {
    let cloud = Arc::new(AzureCli::new(
        ctx.config.cloud.az_binary.clone(),
        ctx.config.cloud.subscription.clone(),
    ));
    cloud
        .check_prerequisites()
        .await
        .context("Azure CLI prerequisites not met")?;
    let subscription = cloud
        .check_access()
        .await
        .context("Azure CLI is not logged in; run 'az login'")?;
    debug!(subscription = %subscription, "Using Azure subscription");
    Ok(GuardProvisioner::new(ctx.config.clone(), cloud.clone(), cloud))
}

fn parse_id(guard_id: &str) -> Result<GuardId> {
    GuardId::parse(guard_id).with_context(|| format!("Invalid guard id '{}'", guard_id))
}

fn read_wireguard_config(source: &str) -> Result<WireGuardConf> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read WireGuard configuration from stdin")?;
        return WireGuardConf::new(text).context("Invalid WireGuard configuration");
    }
    WireGuardConf::from_file(Path::new(source))
        .with_context(|| format!("Failed to read WireGuard configuration from {}", source))
}

pub async fn create(ctx: &Context, args: CreateArgs) -> Result<()> {
    let conf = read_wireguard_config(&args.wireguard_config)?;
    let mut req = CreateGuardRequest::new(conf.as_str()).with_mesh_cidrs(args.mesh_cidrs);
    if let Some(location) = args.location {
        req = req.with_location(location);
    }
    req.metadata = args.metadata;

    let resume = args.guard_id.as_deref().map(parse_id).transpose()?;
    let p = provisioner(ctx).await?;

    let result = match resume {
        Some(id) => {
            info!(guard_id = %id, "Resuming guard");
            p.provision_with_id(&ctx.cancel, id, req).await
        }
        None => p.provision(&ctx.cancel, req).await,
    };

    let guard = match result {
        Ok(guard) => guard,
        Err(Error::PartialProvision {
            guard_id,
            existing,
            source,
        }) => {
            eprintln!(
                "{}",
                format!("Guard {} was only partially created: {}", guard_id, source).red()
            );
            eprintln!("Resources that exist:");
            for id in &existing {
                eprintln!("  - {}", id);
            }
            eprintln!("Resume with:    guardctl create --config <path> --guard-id {}", guard_id);
            eprintln!("Or remove with: guardctl teardown {}", guard_id);
            bail!("Provisioning of {} did not complete", guard_id);
        }
        Err(e) => return Err(e).context("Provisioning failed"),
    };

    if ctx.json {
        output::print_json(&guard)
    } else {
        println!("{}", format!("✓ Guard {} provisioned", guard.guard_id).green());
        output::print_guard(&guard);
        Ok(())
    }
}

pub async fn status(ctx: &Context, guard_id: &str) -> Result<()> {
    let id = parse_id(guard_id)?;
    let p = provisioner(ctx).await?;
    let guard = p
        .discovery()
        .get_guard(&ctx.cancel, &id)
        .await
        .with_context(|| format!("Failed to look up guard {}", id))?;

    if ctx.json {
        output::print_json(&guard)
    } else {
        output::print_guard(&guard);
        Ok(())
    }
}

pub async fn list(ctx: &Context) -> Result<()> {
    let p = provisioner(ctx).await?;
    let guards = p
        .discovery()
        .list_guards(&ctx.cancel)
        .await
        .context("Failed to list guards")?;

    if ctx.json {
        output::print_json(&guards)
    } else {
        output::print_guard_table(&guards);
        Ok(())
    }
}

/// Ask the operator to type the id back
async fn confirm_teardown(guard_id: &GuardId) -> Result<bool> {
    let expected = guard_id.to_string();
    let typed = tokio::task::spawn_blocking(move || {
        dialoguer::Input::<String>::new()
            .with_prompt(format!(
                "This deletes {} and every resource in it. Type the guard id to confirm",
                expected
            ))
            .allow_empty(true)
            .interact_text()
    })
    .await
    .context("Confirmation prompt failed")?
    .context("Failed to read confirmation")?;
    Ok(typed.trim() == guard_id.as_str())
}

pub async fn teardown(ctx: &Context, guard_id: &str, yes: bool) -> Result<()> {
    let id = parse_id(guard_id)?;
    if !yes && !confirm_teardown(&id).await? {
        println!("{}", "Teardown aborted".yellow());
        return Ok(());
    }

    let p = provisioner(ctx).await?;
    let outcome = p
        .teardown(&ctx.cancel, &id)
        .await
        .with_context(|| format!("Teardown of {} failed", id))?;

    if ctx.json {
        output::print_json(&serde_json::json!({
            "guard_id": id,
            "outcome": output::cleanup_label(outcome),
        }))
    } else {
        println!(
            "{}",
            format!("✓ Guard {} {}", id, output::cleanup_label(outcome)).green()
        );
        Ok(())
    }
}

pub async fn peer(ctx: &Context, guard_id: &str, vnet: &str, subnet: Option<String>) -> Result<()> {
    let id = parse_id(guard_id)?;
    let p = provisioner(ctx).await?;
    let guard = p
        .discovery()
        .get_guard(&ctx.cancel, &id)
        .await
        .with_context(|| format!("Failed to look up guard {}", id))?;

    let req = peer_request(&guard, vnet, subnet)?;
    let outcome = p
        .peering()
        .peer_network(&ctx.cancel, &req)
        .await
        .with_context(|| format!("Peering {} with {} failed", id, vnet))?;

    if ctx.json {
        return output::print_json(&outcome);
    }

    println!("{}", format!("✓ Peering {} in place", outcome.peering.name).green());
    if let RemoteLinkStatus::Pending { reason } = &outcome.remote {
        println!(
            "{}",
            "  The reciprocal link could not be created; the remote network owner must add it."
                .yellow()
        );
        println!("  {}", reason.dimmed());
    }
    output::print_peer_outcome(&outcome);
    Ok(())
}

pub async fn unpeer(ctx: &Context, guard_id: &str, vnet: &str) -> Result<()> {
    let id = parse_id(guard_id)?;
    let name = peering_name(&id, vnet);
    let p = provisioner(ctx).await?;
    p.peering()
        .unpeer_network(&ctx.cancel, &id, &name)
        .await
        .with_context(|| format!("Removing peering {} failed", name))?;

    if ctx.json {
        output::print_json(&serde_json::json!({ "guard_id": id, "peering": name, "removed": true }))
    } else {
        println!("{}", format!("✓ Peering {} removed", name).green());
        Ok(())
    }
}

pub fn config_show(ctx: &Context) -> Result<()> {
    if ctx.json {
        return output::print_json(&ctx.config);
    }
    println!("{} {}", "Configuration:".bold(), ctx.config_path.display());
    println!();
    println!("{}", ctx.config.to_toml()?);
    Ok(())
}
