// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Command line configuration for the controller.

use std::time::Duration;

use clap::Parser;
use regex::Regex;

#[derive(Parser, Debug, Clone)]
#[command(name = "templated-secret-controller", version)]
#[command(about = "Renders Secrets from SecretTemplate resources via JSONPath over input resources")]
pub struct Config {
    /// Comma-separated list of namespaces to watch (empty for all)
    #[arg(long, default_value = "")]
    pub watch_namespaces: String,

    /// Namespace to watch (deprecated, use --watch-namespaces instead)
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// How often to reconcile SecretTemplates that cannot rely on watches
    #[arg(long, default_value = "1h", value_parser = parse_duration)]
    pub reconciliation_interval: Duration,

    /// Maximum age of a secret before forcing regeneration (0 disables)
    #[arg(long, default_value = "720h", value_parser = parse_duration)]
    pub max_secret_age: Duration,

    /// Address for the metrics server. If 0, no metrics are served
    #[arg(long, default_value = ":8080")]
    pub metrics_bind_address: String,

    /// Enable leader election for controller HA
    #[arg(long)]
    pub leader_elect: bool,

    /// Resource name for leader election
    #[arg(long, default_value = "templated-secret-controller-leader-election")]
    pub leader_election_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Namespaces to watch. Empty means all namespaces. The legacy
    /// --namespace flag only applies when --watch-namespaces is unset.
    pub fn namespaces(&self) -> Vec<String> {
        if !self.watch_namespaces.is_empty() {
            self.watch_namespaces
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(String::from)
                .collect()
        } else if !self.namespace.is_empty() {
            vec![self.namespace.clone()]
        } else {
            Vec::new()
        }
    }
}

/// Parse Go-style duration strings like "30s", "5m", "1h" or "720h".
/// A bare "0" disables the setting.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let pattern = Regex::new(r"^(?P<number>\d+)(?P<unit>ms|s|m|h|d)$").expect("static pattern");
    let caps = pattern
        .captures(input)
        .ok_or_else(|| format!("invalid duration {input:?}, expected forms like 30s, 5m or 1h"))?;

    let number: u64 = caps["number"]
        .parse()
        .map_err(|e| format!("invalid duration {input:?}: {e}"))?;

    Ok(match &caps["unit"] {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 60 * 60),
        "d" => Duration::from_secs(number * 24 * 60 * 60),
        _ => unreachable!("pattern only matches known units"),
    })
}
