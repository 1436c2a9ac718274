use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser};

use crate::classify::AnnotationKeys;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "podwatt",
    about = "Pod power annotation exporter with quorum-gated node totals",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address the Prometheus exposition endpoint listens on.
    #[arg(
        long,
        env = "PODWATT_BIND",
        value_name = "ADDR",
        default_value = "0.0.0.0:9100"
    )]
    pub bind: SocketAddr,

    #[arg(
        long = "interval-ms",
        env = "PODWATT_INTERVAL_MS",
        value_name = "MILLIS",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(100..=60_000)
    )]
    pub interval_ms: u64,

    /// Fraction of a node's pods that must report the same version before the
    /// node total switches to that version.
    #[arg(
        long = "switch-fraction",
        env = "PODWATT_SWITCH_FRACTION",
        value_name = "FRACTION",
        default_value_t = 0.8,
        allow_negative_numbers = true,
        value_parser = parse_switch_fraction
    )]
    pub switch_fraction: f64,

    #[arg(
        long = "annotation-key",
        env = "PODWATT_ANNOTATION_KEY",
        value_name = "KEY",
        default_value = "emulator.power/watts"
    )]
    pub annotation_key: String,

    #[arg(
        long = "version-key",
        env = "PODWATT_VERSION_KEY",
        value_name = "KEY",
        default_value = "emulator.power/version"
    )]
    pub version_key: String,

    /// Label selector restricting which pods are scanned. Empty selects all pods.
    #[arg(
        long = "label-selector",
        env = "PODWATT_LABEL_SELECTOR",
        value_name = "SELECTOR",
        default_value = "app=kwok-power"
    )]
    pub label_selector: String,

    /// Comma-separated namespace allow-list. Empty scans all namespaces.
    #[arg(
        long,
        env = "PODWATT_NAMESPACES",
        value_name = "NS,NS,...",
        default_value = ""
    )]
    pub namespaces: String,

    /// Kubernetes API server base URL. Empty means in-cluster autodetection.
    #[arg(
        long = "api-server",
        env = "PODWATT_API_SERVER",
        value_name = "URL",
        default_value = ""
    )]
    pub api_server: String,

    #[arg(
        long = "kube-token-file",
        env = "PODWATT_KUBE_TOKEN_FILE",
        value_name = "PATH",
        default_value = ""
    )]
    pub kube_token_file: String,

    #[arg(
        long = "kube-ca-file",
        env = "PODWATT_KUBE_CA_FILE",
        value_name = "PATH",
        default_value = ""
    )]
    pub kube_ca_file: String,

    #[arg(
        long = "kube-insecure",
        env = "PODWATT_KUBE_INSECURE",
        value_name = "BOOL",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub kube_insecure: bool,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn annotation_keys(&self) -> AnnotationKeys {
        AnnotationKeys {
            watts: self.annotation_key.clone(),
            version: self.version_key.clone(),
        }
    }

    pub fn namespace_list(&self) -> Vec<String> {
        self.namespaces
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn label_selector(&self) -> Option<&str> {
        if self.label_selector.is_empty() {
            None
        } else {
            Some(self.label_selector.as_str())
        }
    }
}

fn parse_switch_fraction(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(format!("`{raw}` is not within 0.0..=1.0"));
    }
    Ok(value)
}
