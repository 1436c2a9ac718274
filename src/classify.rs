use std::collections::BTreeMap;

use crate::scan::PodRecord;

/// The two annotation keys tracked per pod, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AnnotationKeys {
    pub watts: String,
    pub version: String,
}

/// One pod with a valid watts/version pair this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub namespace: String,
    pub pod: String,
    pub node: String,
    pub app: String,
    pub column: String,
    pub generation: u64,
    pub watts: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationSlot {
    pub count: usize,
    pub sum: f64,
}

/// Per-node membership counts and sums keyed by generation. Lives for one
/// classification pass only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationBucket {
    generations: BTreeMap<u64, GenerationSlot>,
}

impl GenerationBucket {
    pub fn observe(&mut self, generation: u64, watts: f64) {
        let slot = self.generations.entry(generation).or_default();
        slot.count += 1;
        slot.sum += watts;
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn n_total(&self) -> usize {
        self.generations.values().map(|slot| slot.count).sum()
    }

    /// The most-represented generation; ties go to the numerically higher
    /// generation since the writer assigns them monotonically.
    pub fn best(&self) -> Option<(u64, GenerationSlot)> {
        self.generations
            .iter()
            .max_by_key(|(generation, slot)| (slot.count, **generation))
            .map(|(generation, slot)| (*generation, *slot))
    }
}

#[derive(Debug, Default)]
pub struct Classified {
    pub members: Vec<Member>,
    pub per_node: BTreeMap<String, GenerationBucket>,
}

/// Partitions scanned pods per node by generation. Records missing either
/// annotation, or whose values fail to parse, contribute to no count or sum.
pub fn classify(records: &[PodRecord], keys: &AnnotationKeys) -> Classified {
    let mut classified = Classified::default();
    for record in records {
        let Some(raw_watts) = record.annotations.get(&keys.watts) else {
            continue;
        };
        let Some(raw_version) = record.annotations.get(&keys.version) else {
            continue;
        };
        let (Some(watts), Some(generation)) = (parse_watts(raw_watts), parse_generation(raw_version))
        else {
            continue;
        };

        classified
            .per_node
            .entry(record.node.clone())
            .or_default()
            .observe(generation, watts);
        classified.members.push(Member {
            namespace: record.namespace.clone(),
            pod: record.name.clone(),
            node: record.node.clone(),
            app: record.app.clone(),
            column: record.column.clone(),
            generation,
            watts,
        });
    }
    classified
}

// The annotator writes versions as integers but "12.0" shows up from CSV
// replays; accept both.
fn parse_generation(raw: &str) -> Option<u64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value as u64)
}

fn parse_watts(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    value.is_finite().then_some(value)
}
