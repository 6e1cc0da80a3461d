//! # Controller Configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `SB_CONTROL_PORT` | 2013 |
//! | `SB_MAX_CLIENTS` | 30 |
//! | `SB_LOOPBACK_ONLY` | false |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ControllerError;

/// Default control port.
pub const DEFAULT_PORT: u16 = 2013;

/// Default concurrent session ceiling.
pub const DEFAULT_MAX_CLIENTS: usize = 30;

/// Default limit on one inbound line, newline excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Sessions allowed at once. Further connections wait in the backlog.
    pub max_clients: usize,
    /// Drop connections from non-loopback peers.
    pub loopback_only: bool,
    /// Poll interval while at the session ceiling, and back-off after an
    /// accept error.
    pub accept_backoff: Duration,
    /// Longest line a peer may send. A longer line closes the session.
    pub max_line_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_clients: DEFAULT_MAX_CLIENTS,
            loopback_only: false,
            accept_backoff: Duration::from_secs(1),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by `SB_*` environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("SB_CONTROL_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| ControllerError::InvalidConfig {
                    key: "SB_CONTROL_PORT",
                    value: port.clone(),
                })?;
            config.bind_addr.set_port(port);
        }
        if let Ok(max) = std::env::var("SB_MAX_CLIENTS") {
            config.max_clients = match max.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ControllerError::InvalidConfig {
                        key: "SB_MAX_CLIENTS",
                        value: max,
                    })
                }
            };
        }
        if let Ok(flag) = std::env::var("SB_LOOPBACK_ONLY") {
            config.loopback_only = parse_flag(&flag).ok_or(ControllerError::InvalidConfig {
                key: "SB_LOOPBACK_ONLY",
                value: flag.clone(),
            })?;
        }
        Ok(config)
    }

    /// Loopback listener on an ephemeral port.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..Self::default()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
