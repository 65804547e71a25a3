//! Router Configuration
//!
//! Defaults plus a small `--flag value` parser for the binary.

use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::dispatch::supervisor::DEFAULT_SCAN_INTERVAL;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Where the HTTP front end listens.
    pub http_addr: SocketAddr,
    /// Where workers open their control channel.
    pub control_addr: SocketAddr,
    /// Interface the per-function data listeners bind to.
    pub data_host: IpAddr,
    /// Route `n` listens on `data_port_base + n`; `0` picks ephemeral ports.
    pub data_port_base: u16,
    pub scan_interval: Duration,
    /// How long a new connection may take to send its first frame.
    pub handshake_timeout: Duration,
    /// Capacity of each worker's outbound control and data queues.
    pub channel_capacity: usize,
    /// Period of the stats log line. `None` disables it.
    pub stats_interval: Option<Duration>,
    pub verbose: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            control_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7000),
            data_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_port_base: 7100,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            handshake_timeout: Duration::from_secs(5),
            channel_capacity: 1024,
            stats_interval: Some(Duration::from_secs(30)),
            verbose: false,
        }
    }
}

impl RouterConfig {
    /// Config for tests: everything on loopback with ephemeral ports.
    pub fn local() -> Self {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            http_addr: SocketAddr::new(loopback, 0),
            control_addr: SocketAddr::new(loopback, 0),
            data_host: loopback,
            data_port_base: 0,
            scan_interval: Duration::from_millis(10),
            stats_interval: None,
            ..Self::default()
        }
    }

    /// Parses command-line arguments (without the program name) over the defaults.
    /// Unknown flags are skipped.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            if flag == "--verbose" {
                config.verbose = true;
                i += 1;
                continue;
            }

            let Some(value) = args.get(i + 1) else {
                if is_known_flag(flag) {
                    return Err(anyhow::anyhow!("{} requires a value", flag));
                }
                i += 1;
                continue;
            };

            match flag {
                "--http" => config.http_addr = value.parse()?,
                "--control" => config.control_addr = value.parse()?,
                "--data-host" => config.data_host = value.parse()?,
                "--data-port-base" => config.data_port_base = value.parse()?,
                "--scan-interval-ms" => {
                    config.scan_interval = Duration::from_millis(positive(flag, value)?)
                }
                "--handshake-timeout-ms" => {
                    config.handshake_timeout = Duration::from_millis(positive(flag, value)?)
                }
                "--stats-interval-secs" => {
                    let secs: u64 = value.parse()?;
                    config.stats_interval = (secs > 0).then(|| Duration::from_secs(secs));
                }
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        Ok(config)
    }
}

fn is_known_flag(flag: &str) -> bool {
    matches!(
        flag,
        "--http"
            | "--control"
            | "--data-host"
            | "--data-port-base"
            | "--scan-interval-ms"
            | "--handshake-timeout-ms"
            | "--stats-interval-secs"
    )
}

fn positive(flag: &str, value: &str) -> Result<u64> {
    let parsed: u64 = value.parse()?;
    if parsed == 0 {
        return Err(anyhow::anyhow!("{} must be positive", flag));
    }
    Ok(parsed)
}
