//! A* branch-and-bound schedule optimization.
//!
//! Given a set of candidate suggestions, each with several timing options,
//! pick one option (or skip) per candidate to maximize the total expected
//! reward. Greedy per-candidate selection is locally optimal but can be
//! jointly suboptimal, so the search explores the assignment space with a
//! best-first queue and an admissible prefix-maximum heuristic, pruning
//! branches that cannot beat the incumbent. A node budget bounds wall time;
//! on exhaustion the result downgrades to the greedy schedule.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::CancelToken;
use crate::error::{CoreError, Result};

/// Default node budget for one search.
pub const DEFAULT_MAX_NODES: u64 = 10_000;

/// One timing option of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingChoice {
    pub lead_time: u32,
    /// `suggestion_score × confidence(lead_time)`.
    pub expected_reward: f64,
    pub confidence: f64,
}

/// One candidate entering the schedule search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCandidate {
    pub rule_id: i64,
    pub title: String,
    pub options: Vec<TimingChoice>,
}

/// The chosen option for one candidate; `None` means skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDecision {
    pub rule_id: i64,
    pub lead_time: Option<u32>,
    pub expected_reward: f64,
}

/// How the returned schedule was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationQuality {
    Optimal,
    GreedyFallback,
}

/// Search result and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Decisions in candidate order.
    pub schedule: Vec<ScheduleDecision>,
    pub total_expected_reward: f64,
    pub nodes_explored: u64,
    pub search_time_ms: f64,
    pub search_completed: bool,
    pub optimization_quality: OptimizationQuality,
}

/// A partial schedule: assignments for the first `depth` candidates.
struct SearchNode {
    /// `g + h`: reward so far plus the optimistic remainder.
    priority: f64,
    depth: usize,
    /// Insertion sequence; children are pushed in option order, so smaller
    /// sequence means smaller option index among equal-priority siblings.
    seq: u64,
    reward: f64,
    picks: Vec<Option<u32>>,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first; ties prefer smaller depth (more
        // exploration), then earlier insertion. Deterministic.
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A* branch-and-bound scheduler.
pub struct ScheduleSearch {
    max_nodes: u64,
}

impl ScheduleSearch {
    pub fn new(max_nodes: u64) -> Self {
        Self { max_nodes }
    }

    /// Run the search. Cancellation is checked at every pop.
    pub fn run(
        &self,
        candidates: &[ScheduleCandidate],
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();

        if candidates.is_empty() {
            return Ok(SearchOutcome {
                schedule: Vec::new(),
                total_expected_reward: 0.0,
                nodes_explored: 0,
                search_time_ms: elapsed_ms(started),
                search_completed: true,
                optimization_quality: OptimizationQuality::Optimal,
            });
        }

        let n = candidates.len();

        // Admissible heuristic: the best possible reward from candidate i on.
        let mut max_remaining = vec![0.0f64; n + 1];
        for i in (0..n).rev() {
            let best = candidates[i]
                .options
                .iter()
                .map(|o| o.expected_reward)
                .fold(0.0f64, f64::max);
            max_remaining[i] = max_remaining[i + 1] + best;
        }

        let mut queue: BinaryHeap<SearchNode> = BinaryHeap::new();
        let mut seq = 0u64;
        queue.push(SearchNode {
            priority: max_remaining[0],
            depth: 0,
            seq,
            reward: 0.0,
            picks: Vec::new(),
        });

        let mut best: Option<(f64, Vec<Option<u32>>)> = None;
        let mut nodes_explored = 0u64;
        let mut exhausted = false;

        while let Some(node) = queue.pop() {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if nodes_explored >= self.max_nodes {
                exhausted = true;
                break;
            }
            nodes_explored += 1;

            if node.depth == n {
                let better = best
                    .as_ref()
                    .map(|(reward, _)| node.reward > *reward)
                    .unwrap_or(true);
                if better {
                    best = Some((node.reward, node.picks));
                }
                continue;
            }

            // Bound: this branch can no longer beat the incumbent.
            if let Some((incumbent, _)) = &best {
                if node.reward + max_remaining[node.depth] <= *incumbent {
                    continue;
                }
            }

            let candidate = &candidates[node.depth];
            let child_bound = max_remaining[node.depth + 1];

            for option in &candidate.options {
                let reward = node.reward + option.expected_reward;
                if let Some((incumbent, _)) = &best {
                    if reward + child_bound <= *incumbent {
                        continue;
                    }
                }
                let mut picks = node.picks.clone();
                picks.push(Some(option.lead_time));
                seq += 1;
                queue.push(SearchNode {
                    priority: reward + child_bound,
                    depth: node.depth + 1,
                    seq,
                    reward,
                    picks,
                });
            }

            // Skip action: reward 0 for this candidate.
            let skip_viable = best
                .as_ref()
                .map(|(incumbent, _)| node.reward + child_bound > *incumbent)
                .unwrap_or(true);
            if skip_viable {
                let mut picks = node.picks.clone();
                picks.push(None);
                seq += 1;
                queue.push(SearchNode {
                    priority: node.reward + child_bound,
                    depth: node.depth + 1,
                    seq,
                    reward: node.reward,
                    picks,
                });
            }
        }

        let search_completed = !exhausted;

        let (total, picks, quality) = match best {
            Some((reward, picks)) if search_completed => {
                (reward, picks, OptimizationQuality::Optimal)
            }
            Some((reward, picks)) => {
                // Budget ran out after a complete schedule was found; keep
                // the best one seen but flag the downgrade.
                debug!(nodes_explored, "search budget exhausted, best-so-far schedule kept");
                (reward, picks, OptimizationQuality::GreedyFallback)
            }
            None => {
                debug!(nodes_explored, "search budget exhausted, falling back to greedy");
                let (reward, picks) = greedy_picks(candidates);
                (reward, picks, OptimizationQuality::GreedyFallback)
            }
        };

        Ok(SearchOutcome {
            schedule: build_schedule(candidates, &picks),
            total_expected_reward: total,
            nodes_explored,
            search_time_ms: elapsed_ms(started),
            search_completed,
            optimization_quality: quality,
        })
    }
}

impl Default for ScheduleSearch {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES)
    }
}

/// Per-candidate argmax; ties break toward the smaller lead time. The skip
/// action never wins because option rewards are non-negative.
pub fn greedy_schedule(candidates: &[ScheduleCandidate]) -> SearchOutcome {
    let started = Instant::now();
    let (total, picks) = greedy_picks(candidates);
    SearchOutcome {
        schedule: build_schedule(candidates, &picks),
        total_expected_reward: total,
        nodes_explored: 0,
        search_time_ms: elapsed_ms(started),
        search_completed: true,
        optimization_quality: OptimizationQuality::GreedyFallback,
    }
}

fn greedy_picks(candidates: &[ScheduleCandidate]) -> (f64, Vec<Option<u32>>) {
    let mut total = 0.0;
    let mut picks = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut best: Option<&TimingChoice> = None;
        for option in &candidate.options {
            match best {
                Some(current) if option.expected_reward <= current.expected_reward => {}
                _ => best = Some(option),
            }
        }
        match best {
            Some(option) => {
                total += option.expected_reward;
                picks.push(Some(option.lead_time));
            }
            None => picks.push(None),
        }
    }
    (total, picks)
}

fn build_schedule(
    candidates: &[ScheduleCandidate],
    picks: &[Option<u32>],
) -> Vec<ScheduleDecision> {
    candidates
        .iter()
        .zip(picks)
        .map(|(candidate, pick)| {
            let expected_reward = pick
                .and_then(|lead| {
                    candidate
                        .options
                        .iter()
                        .find(|o| o.lead_time == lead)
                        .map(|o| o.expected_reward)
                })
                .unwrap_or(0.0);
            ScheduleDecision {
                rule_id: candidate.rule_id,
                lead_time: *pick,
                expected_reward,
            }
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(rule_id: i64, rewards: &[(u32, f64)]) -> ScheduleCandidate {
        ScheduleCandidate {
            rule_id,
            title: format!("Task {rule_id}"),
            options: rewards
                .iter()
                .map(|&(lead_time, expected_reward)| TimingChoice {
                    lead_time,
                    expected_reward,
                    confidence: expected_reward,
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_input() {
        let outcome = ScheduleSearch::default()
            .run(&[], &CancelToken::new())
            .unwrap();
        assert!(outcome.schedule.is_empty());
        assert_eq!(outcome.total_expected_reward, 0.0);
        assert!(outcome.search_completed);
    }

    #[test]
    fn test_single_candidate_picks_best_option() {
        let candidates = vec![candidate(1, &[(10, 0.4), (15, 0.7), (30, 0.5), (60, 0.2)])];
        let outcome = ScheduleSearch::default()
            .run(&candidates, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.schedule[0].lead_time, Some(15));
        assert!((outcome.total_expected_reward - 0.7).abs() < 1e-9);
        assert_eq!(outcome.optimization_quality, OptimizationQuality::Optimal);
    }

    #[test]
    fn test_joint_optimum_matches_exhaustive_argmax() {
        // conf_1 falls with lead time, conf_2 rises; the joint best is
        // (10, 60).
        let c1 = candidate(1, &[(10, 0.9), (15, 0.7), (30, 0.5), (60, 0.3)]);
        let c2 = candidate(2, &[(10, 0.3), (15, 0.5), (30, 0.7), (60, 0.9)]);
        let candidates = vec![c1.clone(), c2.clone()];

        let outcome = ScheduleSearch::default()
            .run(&candidates, &CancelToken::new())
            .unwrap();
        assert!(outcome.search_completed);

        // Exhaustive check over every (i, j) pair.
        let mut best_sum = f64::NEG_INFINITY;
        let mut best_pair = (0, 0);
        for a in &c1.options {
            for b in &c2.options {
                if a.expected_reward + b.expected_reward > best_sum {
                    best_sum = a.expected_reward + b.expected_reward;
                    best_pair = (a.lead_time, b.lead_time);
                }
            }
        }
        assert_eq!(best_pair, (10, 60));
        assert_eq!(outcome.schedule[0].lead_time, Some(10));
        assert_eq!(outcome.schedule[1].lead_time, Some(60));
        assert!((outcome.total_expected_reward - best_sum).abs() < 1e-9);
    }

    #[test]
    fn test_completed_search_beats_or_matches_greedy() {
        let candidates = vec![
            candidate(1, &[(10, 0.62), (15, 0.64), (30, 0.31), (60, 0.18)]),
            candidate(2, &[(10, 0.55), (15, 0.12), (30, 0.73), (60, 0.44)]),
            candidate(3, &[(10, 0.21), (15, 0.42), (30, 0.40), (60, 0.81)]),
        ];
        let outcome = ScheduleSearch::default()
            .run(&candidates, &CancelToken::new())
            .unwrap();
        assert!(outcome.search_completed);

        let greedy = greedy_schedule(&candidates);
        assert!(outcome.total_expected_reward >= greedy.total_expected_reward - 1e-9);
    }

    #[test]
    fn test_budget_exhaustion_falls_back_to_greedy() {
        // Equal rewards per candidate create massive priority ties; with
        // smaller-depth-first tie-breaking the frontier fans out and 50
        // nodes are spent before any complete schedule exists.
        let candidates: Vec<ScheduleCandidate> = (1..=8)
            .map(|id| candidate(id, &[(10, 0.5), (15, 0.5), (30, 0.5), (60, 0.5)]))
            .collect();

        let outcome = ScheduleSearch::new(50)
            .run(&candidates, &CancelToken::new())
            .unwrap();
        assert!(!outcome.search_completed);
        assert_eq!(
            outcome.optimization_quality,
            OptimizationQuality::GreedyFallback
        );

        let greedy = greedy_schedule(&candidates);
        for (a, b) in outcome.schedule.iter().zip(&greedy.schedule) {
            assert_eq!(a.lead_time, b.lead_time);
        }
        assert!((outcome.total_expected_reward - greedy.total_expected_reward).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_ties_prefer_smaller_lead() {
        let candidates = vec![candidate(1, &[(10, 0.5), (15, 0.5), (30, 0.5), (60, 0.5)])];
        let greedy = greedy_schedule(&candidates);
        assert_eq!(greedy.schedule[0].lead_time, Some(10));
    }

    #[test]
    fn test_determinism() {
        let candidates = vec![
            candidate(1, &[(10, 0.5), (15, 0.5)]),
            candidate(2, &[(10, 0.5), (15, 0.5)]),
            candidate(3, &[(10, 0.4), (15, 0.4)]),
        ];
        let search = ScheduleSearch::default();
        let first = search.run(&candidates, &CancelToken::new()).unwrap();
        for _ in 0..5 {
            let again = search.run(&candidates, &CancelToken::new()).unwrap();
            for (a, b) in first.schedule.iter().zip(&again.schedule) {
                assert_eq!(a.lead_time, b.lead_time);
            }
        }
    }

    #[test]
    fn test_cancellation() {
        let candidates: Vec<ScheduleCandidate> = (1..=8)
            .map(|id| candidate(id, &[(10, 0.5), (15, 0.5), (30, 0.5), (60, 0.5)]))
            .collect();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = ScheduleSearch::default().run(&candidates, &cancel);
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn test_nodes_explored_reported() {
        let candidates = vec![
            candidate(1, &[(10, 0.9), (60, 0.1)]),
            candidate(2, &[(10, 0.8), (60, 0.2)]),
        ];
        let outcome = ScheduleSearch::default()
            .run(&candidates, &CancelToken::new())
            .unwrap();
        assert!(outcome.nodes_explored > 0);
        assert!(outcome.search_time_ms >= 0.0);
    }
}
