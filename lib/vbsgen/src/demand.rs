use std::collections::HashMap;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::*;
use vbsdata::{CostTable, Instance, Scenario};

use crate::*;
use crate::config::IndexParams;

/// Time bucket of `t` for a scenario starting at `start`: `[start + k*w, start + (k+1)*w)` maps to `k`.
#[inline]
pub fn time_id(start: Timestamp, t: Timestamp, time_window: Timestamp) -> TimeId {
    debug_assert!(time_window > 0);
    debug_assert!(t >= start, "request before scenario start");
    (t - start).div_euclid(time_window) as TimeId
}

/// Feasible (pickup, dropoff) pairs of one OD pair under a walking limit.  The pairs are the
/// product `pickups × dropoffs`, stored as the two factors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    /// Sorted stations within walking limit of the origin.
    pub pickups: Vec<Loc>,
    /// Sorted stations within walking limit of the destination.
    pub dropoffs: Vec<Loc>,
}

impl CandidateSet {
    #[inline]
    pub fn len(&self) -> usize { self.pickups.len() * self.dropoffs.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.pickups.is_empty() || self.dropoffs.is_empty() }

    /// Candidate pairs in product order; the k-th pair has position k.
    pub fn pairs(&self) -> impl Iterator<Item=(Loc, Loc)> + '_ {
        self.pickups.iter()
            .cartesian_product(self.dropoffs.iter())
            .map(|(&p, &d)| (p, d))
    }

    #[inline]
    pub fn contains(&self, pickup: Loc, dropoff: Loc) -> bool {
        self.position(pickup, dropoff).is_some()
    }

    pub fn position(&self, pickup: Loc, dropoff: Loc) -> Option<usize> {
        let pi = self.pickups.binary_search(&pickup).ok()?;
        let di = self.dropoffs.binary_search(&dropoff).ok()?;
        Some(pi * self.dropoffs.len() + di)
    }

    pub fn pair_at(&self, pos: usize) -> Option<(Loc, Loc)> {
        if pos >= self.len() { return None; }
        let m = self.dropoffs.len();
        Some((self.pickups[pos / m], self.dropoffs[pos % m]))
    }
}

/// Scans pickups and dropoffs independently over the eligible `stops` (sorted); O(n) per OD pair.
/// Arcs with an unavailable walking cost are never within the limit.
pub fn candidate_set(walk: &CostTable, stops: &[Loc], (origin, destination): OdPair, limit: Cost) -> CandidateSet {
    debug_assert!(stops.windows(2).all(|w| w[0] < w[1]));
    let within = |c: Option<Cost>| c.map_or(false, |c| c <= limit);
    let pickups = stops.iter().copied().filter(|&p| within(walk.get(origin, p))).collect_vec();
    let dropoffs = stops.iter().copied().filter(|&d| within(walk.get(d, destination))).collect_vec();
    trace!(origin, destination, pickups=pickups.len(), dropoffs=dropoffs.len());
    CandidateSet { pickups, dropoffs }
}

/// Time-bucketed demand of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDemand {
    pub label: String,
    pub start: Timestamp,
    pub num_requests: usize,
    /// Ω: distinct OD pairs with positive demand per bucket, sorted.
    pub omega: Map<TimeId, Vec<OdPair>>,
    /// Q: request count per bucket and OD pair.
    pub q: Map<TimeId, Map<OdPair, u32>>,
}

impl ScenarioDemand {
    fn build(scenario: &Scenario, time_window: Timestamp) -> Self {
        let mut q: Map<TimeId, Map<OdPair, u32>> = Map::default();
        for r in &scenario.requests {
            let t = time_id(scenario.start, r.timestamp, time_window);
            *q.entry(t).or_default().entry(r.od()).or_insert(0) += 1;
        }
        let omega = q.iter()
            .map(|(&t, cell)| (t, cell.keys().copied().sorted().collect_vec()))
            .collect();

        ScenarioDemand {
            label: scenario.label.clone(),
            start: scenario.start,
            num_requests: scenario.len(),
            omega,
            q,
        }
    }

    /// Buckets containing at least one request, ascending.
    pub fn time_ids(&self) -> Vec<TimeId> {
        self.omega.keys().copied().sorted().collect()
    }

    #[inline]
    pub fn has_slot(&self, t: TimeId) -> bool {
        self.omega.contains_key(&t)
    }

    #[inline]
    pub fn od_pairs_at(&self, t: TimeId) -> &[OdPair] {
        self.omega.get(&t).map_or(&[], |v| v.as_slice())
    }

    #[inline]
    pub fn demand(&self, t: TimeId, od: OdPair) -> u32 {
        self.q.get(&t).and_then(|cell| cell.get(&od)).copied().unwrap_or(0)
    }

    pub fn total_demand(&self) -> u64 {
        self.q.values().flat_map(|cell| cell.values()).map(|&c| c as u64).sum()
    }

    /// Distinct OD pairs over all buckets, sorted.
    pub fn od_pairs(&self) -> Vec<OdPair> {
        self.omega.values().flatten().copied().sorted().dedup().collect()
    }

    pub fn num_cells(&self) -> usize {
        self.omega.values().map(|v| v.len()).sum()
    }
}

/// Demand of every scenario plus the candidate sets shared between them.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandIndex {
    pub time_window: Timestamp,
    pub walk_limit: Option<Cost>,
    pub scenarios: Vec<ScenarioDemand>,
    /// One entry per OD pair occurring in any scenario; `None` without a walking limit.
    pub candidates: Option<Map<OdPair, CandidateSet>>,
}

impl DemandIndex {
    /// Buckets the requests of every scenario and, under a walking limit, builds one candidate set
    /// per distinct OD pair restricted to `stops`, the stations eligible as virtual stops.
    #[instrument(level="info", name="build_demand_index", skip(instance, scenarios, stops), fields(instance=%instance.id))]
    pub fn build(instance: &Instance, scenarios: &[Scenario], stops: &[Loc], params: &IndexParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let stops = stops.iter().copied().sorted().dedup().collect_vec();

        let scenarios = scenarios.iter()
            .map(|s| ScenarioDemand::build(s, params.time_window))
            .collect_vec();

        let candidates = params.walk_limit.map(|limit| {
            let od_pairs: Set<OdPair> = scenarios.iter()
                .flat_map(|s| s.omega.values().flatten().copied())
                .collect();
            let candidates: Map<_, _> = od_pairs.into_par_iter()
                .map(|od| (od, candidate_set(&instance.walk, &stops, od, limit)))
                .collect();
            let infeasible = candidates.values().filter(|c| c.is_empty()).count();
            if infeasible > 0 {
                warn!(infeasible, limit, "OD pairs without a candidate pair under the walking limit");
            }
            candidates
        });

        let index = DemandIndex { time_window: params.time_window, walk_limit: params.walk_limit, scenarios, candidates };
        info!(cells=index.num_cells(), scenarios=index.scenarios.len(), "demand index built");
        Ok(index)
    }

    #[inline]
    pub fn scenario(&self, s: ScenarioIdx) -> &ScenarioDemand {
        &self.scenarios[s]
    }

    /// Candidate set of `od`, or `None` when the index was built without a walking limit.
    #[inline]
    pub fn candidates_for(&self, od: OdPair) -> Option<&CandidateSet> {
        self.candidates.as_ref().and_then(|c| c.get(&od))
    }

    #[inline]
    pub fn has_candidates(&self) -> bool {
        self.candidates.is_some()
    }

    /// True if a walking limit is active and `od` has no candidate pair.
    pub fn is_infeasible(&self, od: OdPair) -> bool {
        self.candidates_for(od).map_or(false, |c| c.is_empty())
    }

    pub fn infeasible_od_pairs(&self) -> Vec<OdPair> {
        match &self.candidates {
            None => Vec::new(),
            Some(c) => c.iter().filter(|(_, c)| c.is_empty()).map(|(&od, _)| od).sorted().collect(),
        }
    }

    /// Every (scenario, bucket, OD pair) cell with no valid assignment, sorted.
    pub fn infeasible_cells(&self) -> Vec<(ScenarioIdx, TimeId, OdPair)> {
        self.scenarios.iter()
            .enumerate()
            .flat_map(|(s, sd)| {
                sd.omega.iter().flat_map(move |(&t, ods)| ods.iter().map(move |&od| (s, t, od)))
            })
            .filter(|&(_, _, od)| self.is_infeasible(od))
            .sorted()
            .collect()
    }

    /// All (scenario, bucket) slots with demand.
    pub fn slots(&self) -> Vec<SlotKey> {
        self.scenarios.iter()
            .enumerate()
            .flat_map(|(s, sd)| sd.time_ids().into_iter().map(move |t| (s, t)))
            .collect()
    }

    pub fn num_cells(&self) -> usize {
        self.scenarios.iter().map(|s| s.num_cells()).sum()
    }

    pub fn size_info(&self) -> HashMap<String, isize> {
        let mut info = HashMap::default();
        info.insert("requests".to_string(), self.scenarios.iter().map(|s| s.num_requests).sum::<usize>() as isize);
        info.insert("slots".to_string(), self.slots().len() as isize);
        info.insert("cells".to_string(), self.num_cells() as isize);
        if let Some(c) = &self.candidates {
            info.insert("od_pairs".to_string(), c.len() as isize);
            info.insert("candidate_pairs".to_string(), c.values().map(|c| c.len()).sum::<usize>() as isize);
            info.insert("infeasible_od_pairs".to_string(), c.values().filter(|c| c.is_empty()).count() as isize);
        }
        info
    }
}
