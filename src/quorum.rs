use std::collections::BTreeMap;

use crate::classify::GenerationBucket;

/// Last accepted aggregate for one node. Only a generation that reached
/// quorum is ever stored here, so the total is always the exact sum of a
/// single consistent generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeState {
    pub generation: u64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Quorum reached; the node total switched to the best generation's sum.
    Committed,
    /// Quorum missed (or no data); the prior accepted total is republished.
    Held,
    /// First cycle ever for this node without quorum: the best generation's
    /// sum is published but not accepted.
    Bootstrapped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecision {
    pub node: String,
    pub total: f64,
    pub outcome: Outcome,
}

/// Quorum decision engine. Owns the only state that outlives a poll cycle.
#[derive(Debug)]
pub struct QuorumEngine {
    switch_fraction: f64,
    state: BTreeMap<String, NodeState>,
}

impl QuorumEngine {
    pub fn new(switch_fraction: f64) -> Self {
        Self::with_state(switch_fraction, BTreeMap::new())
    }

    /// Constructs the engine with preset accepted state, so tests can start
    /// mid-history.
    pub fn with_state(switch_fraction: f64, state: BTreeMap<String, NodeState>) -> Self {
        Self {
            switch_fraction,
            state,
        }
    }

    pub fn state(&self) -> &BTreeMap<String, NodeState> {
        &self.state
    }

    /// Number of pods that must agree on one generation before the node total
    /// switches, out of `n_total` valid pods seen this cycle.
    pub fn threshold(&self, n_total: usize) -> usize {
        let need = (self.switch_fraction * n_total as f64).ceil() as usize;
        need.max(1)
    }

    /// Consumes one cycle's buckets and emits one decision per node. Nodes
    /// with prior accepted state that reported nothing this cycle republish
    /// their held total; unknown nodes with no valid records emit nothing.
    pub fn decide(&mut self, buckets: &BTreeMap<String, GenerationBucket>) -> Vec<NodeDecision> {
        let mut decisions = Vec::new();
        for (node, bucket) in buckets {
            if let Some(decision) = self.decide_node(node, bucket) {
                decisions.push(decision);
            }
        }
        for (node, state) in &self.state {
            if !buckets.contains_key(node) {
                decisions.push(NodeDecision {
                    node: node.clone(),
                    total: state.total,
                    outcome: Outcome::Held,
                });
            }
        }
        decisions.sort_by(|a, b| a.node.cmp(&b.node));
        decisions
    }

    fn decide_node(&mut self, node: &str, bucket: &GenerationBucket) -> Option<NodeDecision> {
        let Some((generation, best)) = bucket.best() else {
            // No valid records this cycle: a transient gap, not zero.
            return self.state.get(node).map(|state| NodeDecision {
                node: node.to_string(),
                total: state.total,
                outcome: Outcome::Held,
            });
        };

        if best.count >= self.threshold(bucket.n_total()) {
            self.state.insert(
                node.to_string(),
                NodeState {
                    generation,
                    total: best.sum,
                },
            );
            return Some(NodeDecision {
                node: node.to_string(),
                total: best.sum,
                outcome: Outcome::Committed,
            });
        }

        match self.state.get(node) {
            Some(state) => Some(NodeDecision {
                node: node.to_string(),
                total: state.total,
                outcome: Outcome::Held,
            }),
            None => Some(NodeDecision {
                node: node.to_string(),
                total: best.sum,
                outcome: Outcome::Bootstrapped,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bucket(slots: &[(u64, usize, f64)]) -> GenerationBucket {
        let mut bucket = GenerationBucket::default();
        for &(generation, count, watts_each) in slots {
            for _ in 0..count {
                bucket.observe(generation, watts_each);
            }
        }
        bucket
    }

    fn buckets(nodes: &[(&str, GenerationBucket)]) -> BTreeMap<String, GenerationBucket> {
        nodes
            .iter()
            .map(|(node, bucket)| (node.to_string(), bucket.clone()))
            .collect()
    }

    fn single(decisions: Vec<NodeDecision>) -> NodeDecision {
        assert_eq!(decisions.len(), 1);
        decisions.into_iter().next().unwrap()
    }

    #[test]
    fn threshold_is_ceiled_and_at_least_one() {
        let engine = QuorumEngine::new(0.8);
        assert_eq!(engine.threshold(10), 8);
        assert_eq!(engine.threshold(3), 3); // ceil(2.4)
        assert_eq!(engine.threshold(1), 1);
        let zero = QuorumEngine::new(0.0);
        assert_eq!(zero.threshold(10), 1);
    }

    #[test]
    fn ten_pod_scenario_commit_hold_commit() {
        let mut engine = QuorumEngine::new(0.8);

        // Cycle 1: 8 pods on generation 5, 2 on 4. 8 >= ceil(0.8*10).
        let d = single(engine.decide(&buckets(&[("n1", bucket(&[(5, 8, 10.0), (4, 2, 10.0)]))])));
        assert_eq!(d.outcome, Outcome::Committed);
        assert_eq!(d.total, 80.0);

        // Cycle 2: 7 on 6, 3 on 5. 7 < 8, hold the accepted 80.
        let d = single(engine.decide(&buckets(&[("n1", bucket(&[(6, 7, 10.0), (5, 3, 10.0)]))])));
        assert_eq!(d.outcome, Outcome::Held);
        assert_eq!(d.total, 80.0);

        // Cycle 3: 9 on 6. 9 >= 8, switch to 90.
        let d = single(engine.decide(&buckets(&[("n1", bucket(&[(6, 9, 10.0), (5, 1, 10.0)]))])));
        assert_eq!(d.outcome, Outcome::Committed);
        assert_eq!(d.total, 90.0);
        assert_eq!(
            engine.state()["n1"],
            NodeState {
                generation: 6,
                total: 90.0
            }
        );
    }

    #[test]
    fn does_not_commit_one_below_threshold() {
        let mut engine = QuorumEngine::with_state(
            0.8,
            [(
                "n1".to_string(),
                NodeState {
                    generation: 3,
                    total: 55.0,
                },
            )]
            .into(),
        );
        // ceil(0.8 * 10) = 8; best count is 7.
        let d = single(engine.decide(&buckets(&[("n1", bucket(&[(4, 7, 1.0), (3, 3, 1.0)]))])));
        assert_eq!(d.outcome, Outcome::Held);
        assert_eq!(d.total, 55.0);
        assert_eq!(engine.state()["n1"].generation, 3);

        // One more pod converges: 8 >= 8 commits.
        let d = single(engine.decide(&buckets(&[("n1", bucket(&[(4, 8, 1.0), (3, 2, 1.0)]))])));
        assert_eq!(d.outcome, Outcome::Committed);
        assert_eq!(d.total, 8.0);
    }

    #[test]
    fn committed_sum_spans_a_single_generation() {
        let mut engine = QuorumEngine::new(0.5);
        // Generation 7 wins; generation 6 values must not leak into the total.
        let d = single(engine.decide(&buckets(&[(
            "n1",
            bucket(&[(7, 3, 10.0), (6, 1, 1000.0)]),
        )])));
        assert_eq!(d.outcome, Outcome::Committed);
        assert_eq!(d.total, 30.0);
    }

    #[test]
    fn tie_break_selects_higher_generation() {
        let mut engine = QuorumEngine::new(0.5);
        let d = single(engine.decide(&buckets(&[(
            "n1",
            bucket(&[(4, 2, 10.0), (6, 2, 25.0)]),
        )])));
        assert_eq!(d.outcome, Outcome::Committed);
        assert_eq!(d.total, 50.0);
        assert_eq!(engine.state()["n1"].generation, 6);
    }

    #[test]
    fn held_total_ignores_current_partial_sums() {
        let mut engine = QuorumEngine::new(0.8);
        single(engine.decide(&buckets(&[("n1", bucket(&[(1, 10, 10.0)]))])));

        // Mixed cycle whose best-generation sum differs wildly from 100.
        let d = single(engine.decide(&buckets(&[(
            "n1",
            bucket(&[(2, 5, 99.0), (1, 5, 10.0)]),
        )])));
        assert_eq!(d.outcome, Outcome::Held);
        assert_eq!(d.total, 100.0);
    }

    #[test]
    fn first_cycle_without_quorum_bootstraps_without_accepting() {
        let mut engine = QuorumEngine::new(0.8);
        let d = single(engine.decide(&buckets(&[(
            "n1",
            bucket(&[(2, 5, 10.0), (1, 5, 10.0)]),
        )])));
        assert_eq!(d.outcome, Outcome::Bootstrapped);
        assert_eq!(d.total, 50.0);
        assert!(engine.state().is_empty());

        // Still no quorum next cycle: bootstrap again from fresh data.
        let d = single(engine.decide(&buckets(&[(
            "n1",
            bucket(&[(2, 6, 10.0), (1, 4, 10.0)]),
        )])));
        assert_eq!(d.outcome, Outcome::Bootstrapped);
        assert_eq!(d.total, 60.0);
    }

    #[test]
    fn empty_bucket_republishes_prior_total() {
        let mut engine = QuorumEngine::new(0.8);
        single(engine.decide(&buckets(&[("n1", bucket(&[(1, 4, 10.0)]))])));

        let d = single(engine.decide(&buckets(&[("n1", GenerationBucket::default())])));
        assert_eq!(d.outcome, Outcome::Held);
        assert_eq!(d.total, 40.0);
    }

    #[test]
    fn absent_node_with_state_still_republishes() {
        let mut engine = QuorumEngine::new(0.8);
        single(engine.decide(&buckets(&[("n1", bucket(&[(1, 4, 10.0)]))])));

        let d = single(engine.decide(&BTreeMap::new()));
        assert_eq!(d.node, "n1");
        assert_eq!(d.outcome, Outcome::Held);
        assert_eq!(d.total, 40.0);
    }

    #[test]
    fn unknown_node_with_empty_bucket_emits_nothing() {
        let mut engine = QuorumEngine::new(0.8);
        let decisions = engine.decide(&buckets(&[("n1", GenerationBucket::default())]));
        assert!(decisions.is_empty());
    }

    #[test]
    fn nodes_decide_independently() {
        let mut engine = QuorumEngine::new(0.8);
        let decisions = engine.decide(&buckets(&[
            ("n1", bucket(&[(5, 9, 10.0), (4, 1, 10.0)])),
            ("n2", bucket(&[(5, 5, 10.0), (4, 5, 10.0)])),
        ]));
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].node, "n1");
        assert_eq!(decisions[0].outcome, Outcome::Committed);
        assert_eq!(decisions[1].node, "n2");
        assert_eq!(decisions[1].outcome, Outcome::Bootstrapped);
    }
}
