// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::LogOutput;

/// Default TCP/HTTPS port, matching upstream `passim`'s assigned port.
pub const DEFAULT_PORT: u16 = 27_500;
/// Default per-item size cap: 100 MiB.
pub const DEFAULT_MAX_ITEM_SIZE: u64 = 104_857_600;
/// Default carbon cost, kg CO2e per GB downloaded (see `CarbonSaving`).
pub const DEFAULT_CARBON_COST: f64 = 0.026_367;

/// Parsed `<sysconfdir>/passim.conf`: the `[daemon]` group plus our own
/// `[logger]` group (not part of the upstream file format, but read from
/// the same file so a systemd-launched daemon has one place to configure
/// everything).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DaemonConfig {
    /// TCP port the HTTPS front listens on, and the port advertised via
    /// DNS-SD.
    pub port: u16,
    /// Root of the content-addressed cache (`<path>/<hash>-<basename>`).
    pub path: PathBuf,
    /// Maximum number of bytes `ItemStore::publish` will read from an
    /// input stream before failing with `TooLarge`.
    pub max_item_size: u64,
    /// Whether the HTTPS listener also binds an IPv6 socket.
    pub ipv6: bool,
    /// kg CO2e per GB served, used to derive `CarbonSaving` from
    /// `DownloadSaving`.
    pub carbon_cost: f64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            path: PathBuf::from("/var/lib/passim/data"),
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            ipv6: false,
            carbon_cost: DEFAULT_CARBON_COST,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub output: LogOutput,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads `path`, applying defaults for any key absent from the
    /// `[daemon]`/`[logger]` groups, then validates the result.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let groups = parse_ini(&raw);
        let cfg = Self::from_groups(&groups).context("failed to parse config file")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_groups(groups: &HashMap<String, HashMap<String, String>>) -> Result<Self> {
        let mut daemon = DaemonConfig::default();
        if let Some(g) = groups.get("daemon") {
            if let Some(v) = g.get("Port") {
                daemon.port = v.parse().context("Port must be a u16")?;
            }
            if let Some(v) = g.get("Path") {
                daemon.path = PathBuf::from(v);
            }
            if let Some(v) = g.get("MaxItemSize") {
                daemon.max_item_size = v.parse().context("MaxItemSize must be a u64")?;
            }
            if let Some(v) = g.get("IPv6") {
                daemon.ipv6 = parse_bool(v)?;
            }
            if let Some(v) = g.get("CarbonCost") {
                daemon.carbon_cost = v.parse().context("CarbonCost must be a float")?;
            }
        }

        let mut logger = LoggerConfig::default();
        if let Some(g) = groups.get("logger") {
            if let Some(v) = g.get("Level") {
                logger.level = v.clone();
            }
            if let Some(v) = g.get("Output") {
                logger.output = match v.to_ascii_lowercase().as_str() {
                    "stdout" => LogOutput::Stdout,
                    "stderr" => LogOutput::Stderr,
                    "file" => LogOutput::File,
                    other => anyhow::bail!("unknown logger Output: {other}"),
                };
            }
            if let Some(v) = g.get("File") {
                logger.file = Some(v.clone());
            }
        }

        Ok(Self { daemon, logger })
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.daemon.port != 0, "Port must be nonzero");
        ensure!(self.daemon.max_item_size > 0, "MaxItemSize must be > 0");
        ensure!(
            self.daemon.carbon_cost >= 0.0,
            "CarbonCost must be non-negative"
        );
        if matches!(self.logger.output, LogOutput::File) {
            ensure!(
                self.logger.file.is_some(),
                "logger.file is required when Output=file"
            );
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

/// Minimal INI-subset parser shared by `passim.conf` and the
/// `passim.d/*.conf` fragments: `[group]` headers, `key=value` pairs,
/// blank lines and `#`/`;`-prefixed comments. Keys are case-sensitive and
/// last-write-wins within a group, matching the upstream `GKeyFile`
/// semantics this format was distilled from.
pub fn parse_ini(input: &str) -> HashMap<String, HashMap<String, String>> {
    let mut groups: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::new();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = name.to_string();
            groups.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            groups
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_daemon_group_absent() {
        let groups = parse_ini("");
        let cfg = Config::from_groups(&groups).expect("parse empty config");
        assert_eq!(cfg.daemon.port, DEFAULT_PORT);
        assert_eq!(cfg.daemon.max_item_size, DEFAULT_MAX_ITEM_SIZE);
        assert!((cfg.daemon.carbon_cost - DEFAULT_CARBON_COST).abs() < f64::EPSILON);
    }

    #[test]
    fn overrides_parsed_from_daemon_group() {
        let groups = parse_ini(
            "[daemon]\nPort=8080\nPath=/tmp/cache\nMaxItemSize=1024\nIPv6=true\nCarbonCost=0.5\n",
        );
        let cfg = Config::from_groups(&groups).expect("parse config");
        assert_eq!(cfg.daemon.port, 8080);
        assert_eq!(cfg.daemon.path, PathBuf::from("/tmp/cache"));
        assert_eq!(cfg.daemon.max_item_size, 1024);
        assert!(cfg.daemon.ipv6);
        assert!((cfg.daemon.carbon_cost - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_zero_port() {
        let groups = parse_ini("[daemon]\nPort=0\n");
        let cfg = Config::from_groups(&groups).expect("parse config");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_output_without_file_path_is_rejected() {
        let groups = parse_ini("[logger]\nOutput=file\n");
        let cfg = Config::from_groups(&groups).expect("parse config");
        assert!(cfg.validate().is_err());
    }
}
