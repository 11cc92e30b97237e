//! WireGuard configuration handling
//!
//! The configuration text is passed through to the guard machine untouched.
//! Only the few `[Interface]` fields the orchestration layer needs are read.

use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Opaque WireGuard configuration, guaranteed non-empty
#[derive(Clone, PartialEq, Eq)]
pub struct WireGuardConf(String);

impl WireGuardConf {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::validation("WireGuard configuration cannot be empty"));
        }
        Ok(Self(text))
    }

    /// Read a WireGuard config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::new(content)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ListenPort` from the `[Interface]` section, if present and valid
    pub fn listen_port(&self) -> Option<u16> {
        self.interface_value("listenport")
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|port| *port > 0)
    }

    /// `Address` from the `[Interface]` section
    pub fn interface_address(&self) -> Option<String> {
        self.interface_value("address")
    }

    /// Number of `[Peer]` sections
    pub fn peer_count(&self) -> usize {
        self.0
            .lines()
            .filter(|line| line.trim().eq_ignore_ascii_case("[peer]"))
            .count()
    }

    fn interface_value(&self, wanted: &str) -> Option<String> {
        let mut in_interface = false;

        for line in self.0.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                in_interface = line.eq_ignore_ascii_case("[interface]");
                continue;
            }

            if !in_interface {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if key.trim().eq_ignore_ascii_case(wanted) {
                    return Some(value.trim().to_string());
                }
            }
        }

        None
    }
}

/// Keys and peers must never reach logs
impl std::fmt::Debug for WireGuardConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardConf")
            .field("bytes", &self.0.len())
            .field("listen_port", &self.listen_port())
            .field("peers", &self.peer_count())
            .finish()
    }
}
