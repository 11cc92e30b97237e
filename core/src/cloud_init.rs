//! cloud-init user-data generation for guard machines

use crate::wireguard::WireGuardConf;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const WG_CONF_PATH: &str = "/etc/wireguard/wg0.conf";
pub const WG_INTERFACE: &str = "wg0";

/// Builder for the `#cloud-config` document a guard machine boots with
#[derive(Debug)]
pub struct CloudInitBuilder;

impl CloudInitBuilder {
    /// Generate the user-data for one guard
    pub fn generate(guard_id: &str, conf: &WireGuardConf, mesh_cidrs: &[String]) -> String {
        let mut lines = Vec::new();

        lines.push("#cloud-config".to_string());
        lines.push(format!("# guard: {}", guard_id));
        lines.push("package_update: true".to_string());
        lines.push("packages:".to_string());
        lines.push("  - wireguard-tools".to_string());
        lines.push(String::new());

        // The config is base64-encoded so its content can't break the YAML
        lines.push("write_files:".to_string());
        lines.push(format!("  - path: {}", WG_CONF_PATH));
        lines.push("    owner: root:root".to_string());
        lines.push("    permissions: '0600'".to_string());
        lines.push("    encoding: b64".to_string());
        lines.push(format!("    content: {}", STANDARD.encode(conf.as_str())));
        lines.push("  - path: /etc/sysctl.d/99-guard-forwarding.conf".to_string());
        lines.push("    permissions: '0644'".to_string());
        lines.push("    content: |".to_string());
        lines.push("      net.ipv4.ip_forward = 1".to_string());
        lines.push("      net.ipv6.conf.all.forwarding = 1".to_string());
        lines.push(String::new());

        lines.push("runcmd:".to_string());
        lines.push("  - sysctl --system".to_string());
        lines.push(format!("  - systemctl enable --now wg-quick@{}", WG_INTERFACE));
        for cidr in mesh_cidrs {
            lines.push(format!("  - ip route replace {} dev {}", cidr, WG_INTERFACE));
        }

        lines.push(String::new());
        lines.join("\n")
    }
}
