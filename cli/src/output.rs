//! Human-readable and JSON rendering of command results

use anyhow::Result;
use colored::{ColoredString, Colorize};
use guard_core::{CleanupOutcome, Guard, GuardStatus, PeerOutcome};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn cleanup_label(outcome: CleanupOutcome) -> &'static str {
    match outcome {
        CleanupOutcome::Deleted => "deleted",
        CleanupOutcome::AlreadyAbsent => "already absent",
    }
}

fn status_colored(status: GuardStatus) -> ColoredString {
    match status {
        GuardStatus::Active => status.as_str().green(),
        GuardStatus::Provisioning => status.as_str().cyan(),
        GuardStatus::PartiallyCreated => status.as_str().yellow(),
        GuardStatus::TearingDown => status.as_str().magenta(),
        GuardStatus::Degraded => status.as_str().red(),
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

pub fn print_guard(guard: &Guard) {
    println!("{}", guard.guard_id.as_str().bold());
    println!("  Status:      {}", status_colored(guard.status));
    println!("  Location:    {}", or_dash(guard.location.as_deref()));
    println!("  Boundary:    {}", guard.boundary);
    println!("  Public IP:   {}", or_dash(guard.public_ip.as_deref()));
    println!("  Private IP:  {}", or_dash(guard.private_ip.as_deref()));
    println!(
        "  WireGuard:   {}",
        guard
            .wireguard_port
            .map(|p| format!("udp/{}", p))
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  Forwarding:  {}",
        if guard.ip_forwarding { "enabled".green() } else { "disabled".red() }
    );
    println!(
        "  Machine:     {}",
        guard
            .machine_state
            .map(|s| s.display_name())
            .unwrap_or("absent")
    );
    if let Some(created) = guard.created_at {
        println!("  Created:     {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  Mesh CIDRs:  {}",
        if guard.mesh_cidrs.is_empty() {
            "-".to_string()
        } else {
            guard.mesh_cidrs.join(", ")
        }
    );

    if !guard.metadata.is_empty() {
        println!("  Metadata:");
        for (key, value) in &guard.metadata {
            println!("    {} = {}", key, value);
        }
    }

    if !guard.peerings.is_empty() {
        println!("  Peerings:");
        for peering in &guard.peerings {
            println!(
                "    {} -> {} ({:?}{})",
                peering.name,
                peering.remote_network_id,
                peering.state,
                if peering.route_table_id.is_some() { ", routed" } else { "" }
            );
        }
    }

    let existing = guard.resources.existing();
    println!("  Resources:   {}", existing.len());
    for id in existing {
        println!("    {}", id.dimmed());
    }
}

pub fn print_guard_table(guards: &[Guard]) {
    if guards.is_empty() {
        println!("{}", "No guards found".yellow());
        return;
    }

    println!("{} guards found:", guards.len());
    println!(
        "{:<28} {:<18} {:<14} {:<16} {:<16} {}",
        "ID", "STATUS", "LOCATION", "PUBLIC IP", "PRIVATE IP", "MESH"
    );
    for guard in guards {
        // Pad before colouring so escape codes don't break alignment
        let status = format!("{:<18}", guard.status.as_str());
        let status = match guard.status {
            GuardStatus::Active => status.green(),
            GuardStatus::Degraded => status.red(),
            GuardStatus::PartiallyCreated => status.yellow(),
            _ => status.normal(),
        };
        println!(
            "{:<28} {} {:<14} {:<16} {:<16} {}",
            guard.guard_id.as_str(),
            status,
            or_dash(guard.location.as_deref()),
            or_dash(guard.public_ip.as_deref()),
            or_dash(guard.private_ip.as_deref()),
            guard.mesh_cidrs.join(",")
        );
        if let Some(error) = guard.metadata.get(Guard::DISCOVERY_ERROR_KEY) {
            println!("  {}", error.dimmed());
        }
    }
}

pub fn print_peer_outcome(outcome: &PeerOutcome) {
    println!("  Remote:      {}", outcome.peering.remote_network_id);
    println!("  State:       {:?}", outcome.peering.state);
    if let Some(table) = &outcome.peering.route_table_id {
        println!("  Route table: {}", table);
        for route in &outcome.routes {
            println!("    {} -> {}", route.address_prefix, route.next_hop_ip);
        }
    }
}
