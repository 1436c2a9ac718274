use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::{Arc, RwLock},
};

use crate::classify::Member;

pub const TEXT_MIME: &str = "text/plain; version=0.0.4";

const POD_LABELS: &[&str] = &["namespace", "pod", "node", "app", "column", "version"];
const NODE_LABELS: &[&str] = &["node"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyKind {
    Gauge,
    Counter,
}

/// One metric family: a fixed label schema plus the current sample per label
/// set. Samples persist across scan cycles, so a pod or node missing from one
/// scan keeps exporting its last value, the same way the upstream Prometheus
/// client keeps gauges alive.
#[derive(Debug)]
struct Family {
    name: &'static str,
    help: &'static str,
    kind: FamilyKind,
    label_names: &'static [&'static str],
    samples: RwLock<BTreeMap<Vec<String>, f64>>,
}

impl Family {
    fn new(
        name: &'static str,
        help: &'static str,
        kind: FamilyKind,
        label_names: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind,
            label_names,
            samples: RwLock::new(BTreeMap::new()),
        }
    }

    fn set(&self, labels: Vec<String>, value: f64) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let mut samples = self.samples.write().expect("metrics registry poisoned");
        samples.insert(labels, value);
    }

    fn add(&self, labels: Vec<String>, delta: f64) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let mut samples = self.samples.write().expect("metrics registry poisoned");
        *samples.entry(labels).or_insert(0.0) += delta;
    }

    fn get(&self, labels: &[String]) -> Option<f64> {
        let samples = self.samples.read().expect("metrics registry poisoned");
        samples.get(labels).copied()
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let kind = match self.kind {
            FamilyKind::Gauge => "gauge",
            FamilyKind::Counter => "counter",
        };
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
        let samples = self.samples.read().expect("metrics registry poisoned");
        for (labels, value) in samples.iter() {
            out.push_str(self.name);
            write_labels(self.label_names, labels, out);
            let _ = writeln!(out, " {value}");
        }
    }
}

fn write_labels(names: &[&str], values: &[String], out: &mut String) {
    if names.is_empty() {
        return;
    }
    out.push('{');
    for (idx, (name, value)) in names.iter().zip(values).enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push_str("=\"");
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '"' => out.push_str("\\\""),
                other => out.push(other),
            }
        }
        out.push('"');
    }
    out.push('}');
}

/// The exporter's metric surface, rendered in Prometheus text exposition
/// format. Cheap to clone; all clones share the same samples.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    pod_power: Family,
    node_power: Family,
    scan_errors: Family,
    last_scan: Family,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pod_power: Family::new(
                    "pod_power_watts",
                    "Per-pod power in watts",
                    FamilyKind::Gauge,
                    POD_LABELS,
                ),
                node_power: Family::new(
                    "node_power_watts",
                    "Per-node power in watts",
                    FamilyKind::Gauge,
                    NODE_LABELS,
                ),
                scan_errors: Family::new(
                    "podwatt_scan_errors_total",
                    "Pod list cycles that failed and were skipped",
                    FamilyKind::Counter,
                    &[],
                ),
                last_scan: Family::new(
                    "podwatt_last_scan_timestamp_seconds",
                    "Unix time of the last successful pod scan",
                    FamilyKind::Gauge,
                    &[],
                ),
            }),
        }
    }

    /// Per-pod gauge always reflects the latest valid annotation, regardless
    /// of the node's quorum state.
    pub fn set_pod_power(&self, member: &Member) {
        self.inner.pod_power.set(
            vec![
                member.namespace.clone(),
                member.pod.clone(),
                member.node.clone(),
                member.app.clone(),
                member.column.clone(),
                member.generation.to_string(),
            ],
            member.watts,
        );
    }

    pub fn set_node_power(&self, node: &str, watts: f64) {
        self.inner.node_power.set(vec![node.to_string()], watts);
    }

    pub fn inc_scan_errors(&self) {
        self.inner.scan_errors.add(Vec::new(), 1.0);
    }

    pub fn set_last_scan_timestamp(&self, unix_seconds: f64) {
        self.inner.last_scan.set(Vec::new(), unix_seconds);
    }

    pub fn node_power(&self, node: &str) -> Option<f64> {
        self.inner.node_power.get(&[node.to_string()])
    }

    pub fn scan_errors(&self) -> f64 {
        self.inner.scan_errors.get(&[]).unwrap_or(0.0)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.inner.pod_power.render(&mut out);
        self.inner.node_power.render(&mut out);
        self.inner.scan_errors.render(&mut out);
        self.inner.last_scan.render(&mut out);
        out
    }
}
