use std::collections::HashMap;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::*;
use vbsdata::CostTable;

use crate::*;
use crate::config::DetourParams;
use crate::demand::{DemandIndex, ScenarioDemand};

/// A vehicle routed `j -> k -> l` serves a `k`-bound and an `l`-bound passenger both picked up at `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SameSource {
    pub j: Loc,
    pub k: Loc,
    pub l: Loc,
}

/// A vehicle routed `j -> k -> l` serves a pickup at `j` and a pickup at `k` `dt` buckets later,
/// both dropped at `l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SameDest {
    pub j: Loc,
    pub k: Loc,
    pub l: Loc,
    pub dt: TimeId,
}

/// Orientations of an unordered triple `a < b < c` as `(j, k, l)`.  The first three keep `j < l`.
#[inline]
fn orientations(a: Loc, b: Loc, c: Loc) -> [(Loc, Loc, Loc); 6] {
    [(a, b, c), (b, a, c), (a, c, b), (c, b, a), (c, a, b), (b, c, a)]
}

/// The direct edge `j -> l` must be strictly the longest of the three and the detour through `k`
/// may add at most `delay`.  Any unavailable cost makes the triple infeasible.
#[inline]
pub fn is_detour(route: &CostTable, j: Loc, k: Loc, l: Loc, delay: Cost) -> bool {
    let e3 = match route.get(j, l) { Some(c) => c, None => return false };
    let e1 = match route.get(j, k) { Some(c) if c < e3 => c, _ => return false };
    let e2 = match route.get(k, l) { Some(c) if c < e3 => c, _ => return false };
    e1 + e2 <= e3 + delay
}

/// Every unordered station triple with a feasible orientation, emitted once in the first feasible
/// orientation.  Reversed orientations are only tried for asymmetric costs.
#[instrument(level="info", skip(route, stations))]
pub fn same_source_triplets(route: &CostTable, stations: &[Loc], delay: Cost) -> Vec<SameSource> {
    let stations = stations.iter().copied().sorted().dedup().collect_vec();
    let n_orient = if route.is_symmetric() { 3 } else { 6 };
    let n = stations.len();

    let triplets: Vec<_> = (0..n).into_par_iter()
        .map(|ia| {
            let _s = trace_span!("outer", a=stations[ia]).entered();
            let mut found = Vec::new();
            let a = stations[ia];
            for ib in (ia + 1)..n {
                let b = stations[ib];
                for &c in &stations[(ib + 1)..] {
                    let hit = orientations(a, b, c)[..n_orient].iter()
                        .copied()
                        .find(|&(j, k, l)| is_detour(route, j, k, l, delay));
                    if let Some((j, k, l)) = hit {
                        trace!(j, k, l, "feasible");
                        found.push(SameSource { j, k, l });
                    }
                }
            }
            found.into_iter()
        })
        .flatten_iter()
        .collect();

    info!(count=triplets.len(), "same-source triplets");
    triplets
}

/// Time offset of the second pickup: `floor(cost(j, k) / time_window)`.  `None` if the arc is
/// missing or the offset does not fit a [`TimeId`].
#[inline]
pub fn pickup_offset(route: &CostTable, j: Loc, k: Loc, time_window: Timestamp) -> Option<TimeId> {
    let dt = (route.get(j, k)? / time_window as Cost).floor();
    if dt <= TimeId::MAX as Cost { Some(dt as TimeId) } else { None }
}

/// Reinterprets each feasible triplet as (first pickup, second pickup, shared dropoff).
pub fn same_dest_quadruplets(route: &CostTable, triplets: &[SameSource], time_window: Timestamp) -> Vec<SameDest> {
    let quads = triplets.iter()
        .filter_map(|&SameSource { j, k, l }| {
            let dt = pickup_offset(route, j, k, time_window)?;
            Some(SameDest { j, k, l, dt })
        })
        .collect_vec();
    debug!(count=quads.len(), "same-dest quadruplets");
    quads
}

/// Indices into [`PoolingIndex::same_source`] and [`PoolingIndex::same_dest`] realisable in one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotCombos {
    pub same_source: Vec<usize>,
    pub same_dest: Vec<usize>,
}

/// Legs `(pickup, dropoff)` usable by some OD pair of a slot, with the OD pairs that can use them.
type LegSupport = Map<(Loc, Loc), Vec<OdPair>>;

fn leg_support(demand: &DemandIndex, sd: &ScenarioDemand, t: TimeId) -> LegSupport {
    let mut legs: LegSupport = Map::default();
    for &od in sd.od_pairs_at(t) {
        if let Some(c) = demand.candidates_for(od) {
            for (p, d) in c.pairs() {
                if p != d {
                    legs.entry((p, d)).or_insert_with(Vec::new).push(od);
                }
            }
        }
    }
    legs
}

/// True if two different requests can take one leg each.  Within a single bucket the same OD pair
/// only qualifies if it has at least two requests.
fn distinct_requests(sd: &ScenarioDemand, t1: TimeId, first: &[OdPair], t2: TimeId, second: &[OdPair]) -> bool {
    if t1 != t2 {
        return !first.is_empty() && !second.is_empty();
    }
    first.iter().any(|&a| second.iter().any(|&b| a != b || sd.demand(t1, a) >= 2))
}

/// Global pooling combinations plus, under sparse candidate sets, their per-slot subsets.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolingIndex {
    pub routing_delay: Cost,
    pub time_window: Timestamp,
    pub same_source: Vec<SameSource>,
    pub same_dest: Vec<SameDest>,
    /// `None` when the demand index has no candidate sets; every slot with demand has an entry otherwise.
    pub per_slot: Option<Map<SlotKey, SlotCombos>>,
}

impl PoolingIndex {
    #[instrument(level="info", name="build_pooling_index", skip(route, stations, demand))]
    pub fn build(route: &CostTable, stations: &[Loc], params: &DetourParams, demand: Option<&DemandIndex>) -> Result<Self, ConfigError> {
        params.validate()?;
        if let Some(demand) = demand {
            if demand.time_window != params.time_window {
                return Err(ConfigError::TimeWindowMismatch { index: demand.time_window, detour: params.time_window });
            }
        }

        let same_source = same_source_triplets(route, stations, params.routing_delay);
        let same_dest = same_dest_quadruplets(route, &same_source, params.time_window);
        let mut index = PoolingIndex {
            routing_delay: params.routing_delay,
            time_window: params.time_window,
            same_source,
            same_dest,
            per_slot: None,
        };

        if let Some(demand) = demand.filter(|d| d.has_candidates()) {
            index.per_slot = Some(index.filter_slots(demand));
        }
        Ok(index)
    }

    #[instrument(level="debug", skip(self, demand))]
    fn filter_slots(&self, demand: &DemandIndex) -> Map<SlotKey, SlotCombos> {
        let slots = demand.slots();
        let support: Map<SlotKey, LegSupport> = slots.par_iter()
            .map(|&(s, t)| ((s, t), leg_support(demand, demand.scenario(s), t)))
            .collect();

        let per_slot: Map<SlotKey, SlotCombos> = slots.par_iter()
            .map(|&(s, t)| {
                let _s = trace_span!("slot_filter", s, t).entered();
                let sd = demand.scenario(s);
                let here = &support[&(s, t)];

                let same_source = self.same_source.iter()
                    .enumerate()
                    .filter(|(_, c)| {
                        match (here.get(&(c.j, c.k)), here.get(&(c.j, c.l))) {
                            (Some(a), Some(b)) => distinct_requests(sd, t, a, t, b),
                            _ => false,
                        }
                    })
                    .map(|(i, _)| i)
                    .collect_vec();

                let same_dest = self.same_dest.iter()
                    .enumerate()
                    .filter(|(_, c)| {
                        let there = t.checked_add(c.dt)
                            .and_then(|later| support.get(&(s, later)).map(|there| (later, there)));
                        let (later, there) = match there {
                            Some(x) => x,
                            None => return false,
                        };
                        match (here.get(&(c.j, c.l)), there.get(&(c.k, c.l))) {
                            (Some(a), Some(b)) => distinct_requests(sd, t, a, later, b),
                            _ => false,
                        }
                    })
                    .map(|(i, _)| i)
                    .collect_vec();

                trace!(same_source=same_source.len(), same_dest=same_dest.len());
                ((s, t), SlotCombos { same_source, same_dest })
            })
            .collect();

        debug!(slots=per_slot.len(), "per-slot pooling filter built");
        per_slot
    }

    #[inline]
    pub fn is_filtered(&self) -> bool {
        self.per_slot.is_some()
    }

    /// Same-source combinations usable in `slot` as (global index, combination).  Without per-slot
    /// filtering this is the global list; a slot without demand yields nothing.
    pub fn same_source_at(&self, slot: SlotKey) -> Vec<(usize, SameSource)> {
        match &self.per_slot {
            None => self.same_source.iter().copied().enumerate().collect(),
            Some(per_slot) => per_slot.get(&slot)
                .map(|c| c.same_source.iter().map(|&i| (i, self.same_source[i])).collect())
                .unwrap_or_default(),
        }
    }

    pub fn same_dest_at(&self, slot: SlotKey) -> Vec<(usize, SameDest)> {
        match &self.per_slot {
            None => self.same_dest.iter().copied().enumerate().collect(),
            Some(per_slot) => per_slot.get(&slot)
                .map(|c| c.same_dest.iter().map(|&i| (i, self.same_dest[i])).collect())
                .unwrap_or_default(),
        }
    }

    pub fn size_info(&self) -> HashMap<String, isize> {
        let mut info = HashMap::default();
        info.insert("same_source".to_string(), self.same_source.len() as isize);
        info.insert("same_dest".to_string(), self.same_dest.len() as isize);
        if let Some(per_slot) = &self.per_slot {
            info.insert("slot_same_source".to_string(), per_slot.values().map(|c| c.same_source.len()).sum::<usize>() as isize);
            info.insert("slot_same_dest".to_string(), per_slot.values().map(|c| c.same_dest.len()).sum::<usize>() as isize);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;
    use crate::config::IndexParams;
    use crate::demand::tests::{line_instance, scaled_line};
    use proptest::prelude::*;
    use vbsdata::{Scenario, synthetic::SyntheticConfig};

    /// Symmetric table over 4 stations; station 0 has no routing arcs.
    fn table(c12: Cost, c23: Cost, c13: Cost) -> CostTable {
        let arcs = vec![((1, 2), c12), ((2, 3), c23), ((1, 3), c13)];
        let arcs = arcs.into_iter().flat_map(|((i, j), c)| vec![((i, j), c), ((j, i), c)]);
        CostTable::from_arcs(4, arcs).unwrap()
    }

    #[test]
    fn predicate_delay_bound() {
        init_test_logging(None::<&str>);
        let route = table(10.0, 12.0, 18.0);
        assert!(is_detour(&route, 1, 2, 3, 5.0));
        assert!(!is_detour(&route, 1, 2, 3, 2.0));
        assert_eq!(same_source_triplets(&route, &[0, 1, 2, 3], 5.0), vec![SameSource { j: 1, k: 2, l: 3 }]);
        assert!(same_source_triplets(&route, &[0, 1, 2, 3], 2.0).is_empty());
    }

    #[test]
    fn longest_edge_must_be_direct() {
        let route = table(30.0, 10.0, 15.0);
        for delay in (0..100).map(|d| d as Cost) {
            assert!(!is_detour(&route, 1, 2, 3, delay));
            let t = same_source_triplets(&route, &[1, 2, 3], delay);
            assert!(!t.contains(&SameSource { j: 1, k: 2, l: 3 }));
            // 1 -> 3 -> 2 detours around the longest edge (1, 2)
            assert_eq!(t, vec![SameSource { j: 1, k: 3, l: 2 }]);
        }
    }

    #[test]
    fn equal_edges_never_pool() {
        let route = table(10.0, 10.0, 10.0);
        for &delay in &[0.0, 1.0, 5.0, 1e6] {
            assert!(same_source_triplets(&route, &[0, 1, 2, 3], delay).is_empty());
        }
    }

    #[test]
    fn missing_cost_is_infeasible() {
        let route = table(10.0, 12.0, 18.0);
        assert!(!is_detour(&route, 0, 2, 3, 1e9));
        assert!(!is_detour(&route, 1, 0, 3, 1e9));
    }

    #[test]
    fn same_dest_offset() {
        let route = table(600.0, 300.0, 800.0);
        let triplets = same_source_triplets(&route, &[1, 2, 3], 150.0);
        let quads = same_dest_quadruplets(&route, &triplets, 300);
        assert_eq!(quads, vec![SameDest { j: 1, k: 2, l: 3, dt: 2 }]);
        assert!(same_source_triplets(&route, &[1, 2, 3], 99.0).is_empty());
    }

    #[test]
    fn offsets_beyond_time_id_range() -> anyhow::Result<()> {
        let route = CostTable::from_fn(3, |i, j| Some(5e9 * (i as f64 - j as f64).abs()))?;
        assert_eq!(pickup_offset(&route, 0, 1, 1), None);
        assert_eq!(pickup_offset(&route, 0, 1, 2), Some(2_500_000_000));
        let triplets = same_source_triplets(&route, &[0, 1, 2], 0.0);
        assert_eq!(triplets, vec![SameSource { j: 0, k: 1, l: 2 }]);
        assert!(same_dest_quadruplets(&route, &triplets, 1).is_empty());
        assert_eq!(same_dest_quadruplets(&route, &triplets, 2), vec![SameDest { j: 0, k: 1, l: 2, dt: 2_500_000_000 }]);
        Ok(())
    }

    #[test]
    fn shifted_slot_past_time_id_range() -> anyhow::Result<()> {
        // dt = 4e9 fits, but bucket 3e8 + dt does not
        let inst = scaled_line(3, 4e9, &[(0, 2, 0), (0, 2, 300_000_000), (1, 2, 300_000_000)]);
        let stops = inst.locs();
        let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &stops, &IndexParams { time_window: 1, walk_limit: Some(0.0) })?;
        let pooling = PoolingIndex::build(&inst.route, &stops, &DetourParams { routing_delay: 0.0, time_window: 1 }, Some(&demand))?;
        assert_eq!(pooling.same_dest, vec![SameDest { j: 0, k: 1, l: 2, dt: 4_000_000_000 }]);
        assert!(pooling.same_dest_at((0, 0)).is_empty());
        assert!(pooling.same_dest_at((0, 300_000_000)).is_empty());
        Ok(())
    }

    #[test]
    fn asymmetric_costs_try_reverse() -> anyhow::Result<()> {
        // only 3 -> 2 -> 1 is a valid detour
        let arcs = vec![((3, 2), 5.0), ((2, 1), 5.0), ((3, 1), 9.0), ((1, 2), 50.0), ((2, 3), 50.0), ((1, 3), 60.0)];
        let route = CostTable::from_arcs(4, arcs)?;
        assert_eq!(same_source_triplets(&route, &[1, 2, 3], 1.0), vec![SameSource { j: 3, k: 2, l: 1 }]);
        Ok(())
    }

    #[test]
    fn rejects_bad_config() {
        let route = table(10.0, 12.0, 18.0);
        assert_eq!(
            PoolingIndex::build(&route, &[1, 2, 3], &DetourParams { routing_delay: -1.0, time_window: 60 }, None),
            Err(ConfigError::NegativeRoutingDelay(-1.0))
        );
        assert_eq!(
            PoolingIndex::build(&route, &[1, 2, 3], &DetourParams { routing_delay: 1.0, time_window: 0 }, None),
            Err(ConfigError::NonPositiveTimeWindow(0))
        );
    }

    #[test]
    fn unfiltered_without_candidates() -> anyhow::Result<()> {
        let inst = line_instance(4, &[(0, 1, 0), (0, 2, 10)]);
        let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &inst.locs(), &IndexParams { time_window: 300, walk_limit: None })?;
        let pooling = PoolingIndex::build(&inst.route, &inst.locs(), &DetourParams { routing_delay: 0.0, time_window: 300 }, Some(&demand))?;
        assert!(!pooling.is_filtered());
        // collinear stations: every triple pools in index order
        assert_eq!(pooling.same_source.len(), 4);
        assert_eq!(pooling.same_source_at((0, 0)).len(), 4);
        assert_eq!(pooling.same_dest_at((0, 7)).len(), 4);

        let err = PoolingIndex::build(&inst.route, &inst.locs(), &DetourParams { routing_delay: 0.0, time_window: 60 }, Some(&demand));
        assert_eq!(err, Err(ConfigError::TimeWindowMismatch { index: 300, detour: 60 }));
        Ok(())
    }

    #[test]
    fn per_slot_same_source() -> anyhow::Result<()> {
        // walking limit 0: each OD pair is served exactly at its own stations
        let inst = line_instance(4, &[
            (0, 1, 0), (0, 2, 10),        // slot 0: (0,1,2) realisable
            (0, 2, 300), (0, 2, 310),     // slot 1: leg (0,1) missing
            (1, 3, 600), (1, 3, 610),     // slot 2: same OD twice, legs (1,3) only
        ]);
        let stops = inst.locs();
        let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &stops, &IndexParams { time_window: 300, walk_limit: Some(0.0) })?;
        let pooling = PoolingIndex::build(&inst.route, &stops, &DetourParams { routing_delay: 0.0, time_window: 300 }, Some(&demand))?;
        assert!(pooling.is_filtered());

        let at0 = pooling.same_source_at((0, 0)).into_iter().map(|(_, c)| c).collect_vec();
        assert_eq!(at0, vec![SameSource { j: 0, k: 1, l: 2 }]);
        assert!(pooling.same_source_at((0, 1)).is_empty());
        assert!(pooling.same_source_at((0, 2)).is_empty());
        // slot without demand
        assert!(pooling.same_source_at((0, 9)).is_empty());
        assert_eq!(pooling.per_slot.as_ref().unwrap().len(), 3);
        Ok(())
    }

    #[test]
    fn per_slot_same_dest_uses_shifted_slot() -> anyhow::Result<()> {
        // cost(0, 1) = 100 and window 50 => dt = 2 for (0, 1, 2)
        let inst = line_instance(4, &[(0, 2, 0), (1, 2, 100), (1, 2, 110), (0, 2, 120)]);
        let stops = inst.locs();
        let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &stops, &IndexParams { time_window: 50, walk_limit: Some(0.0) })?;
        let pooling = PoolingIndex::build(&inst.route, &stops, &DetourParams { routing_delay: 0.0, time_window: 50 }, Some(&demand))?;

        let quad = SameDest { j: 0, k: 1, l: 2, dt: 2 };
        assert!(pooling.same_dest.contains(&quad));
        let at0 = pooling.same_dest_at((0, 0)).into_iter().map(|(_, c)| c).collect_vec();
        assert_eq!(at0, vec![quad]);
        // bucket 2 holds (1,2) and (0,2) but bucket 4 does not exist
        assert!(pooling.same_dest_at((0, 2)).is_empty());
        Ok(())
    }

    #[test]
    fn per_slot_same_dest_zero_offset_needs_two_requests() -> anyhow::Result<()> {
        let inst = line_instance(3, &[(0, 2, 0), (1, 2, 10), (0, 2, 300)]);
        let stops = inst.locs();
        let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &stops, &IndexParams { time_window: 300, walk_limit: Some(0.0) })?;
        let pooling = PoolingIndex::build(&inst.route, &stops, &DetourParams { routing_delay: 0.0, time_window: 300 }, Some(&demand))?;
        assert_eq!(pooling.same_dest, vec![SameDest { j: 0, k: 1, l: 2, dt: 0 }]);
        assert_eq!(pooling.same_dest_at((0, 0)).len(), 1);
        assert!(pooling.same_dest_at((0, 1)).is_empty());
        let info = pooling.size_info();
        assert_eq!(info["same_dest"], 1);
        assert_eq!(info["slot_same_dest"], 1);
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]
        #[test]
        fn complete_and_unique(seed in 0..500u64, delay in 0.0..300.0f64) {
            let cfg = SyntheticConfig { num_stations: 14, num_requests: 0, ..Default::default() };
            let inst = cfg.generate(seed).unwrap();
            let locs = inst.locs();
            let triplets = same_source_triplets(&inst.route, &locs, delay);

            // Property: no unordered triple appears twice
            let keys: Set<_> = triplets.iter().map(|t| { let mut v = [t.j, t.k, t.l]; v.sort(); v }).collect();
            prop_assert_eq!(keys.len(), triplets.len());

            // Property: everything emitted is feasible, every feasible triple is emitted
            for t in &triplets {
                prop_assert!(is_detour(&inst.route, t.j, t.k, t.l, delay));
            }
            for (a, b, c) in locs.iter().copied().tuple_combinations() {
                let feasible = orientations(a, b, c).iter().any(|&(j, k, l)| is_detour(&inst.route, j, k, l, delay));
                prop_assert_eq!(feasible, keys.contains(&[a, b, c]));
            }

            // Property: Δt is floor(cost(j, k) / window)
            for q in same_dest_quadruplets(&inst.route, &triplets, 120) {
                let c = inst.route.get(q.j, q.k).unwrap();
                prop_assert!(q.dt as Cost * 120.0 <= c && c < (q.dt + 1) as Cost * 120.0);
            }
        }

        #[test]
        fn slot_filter_is_subset(seed in 0..500u64, limit in 0.0..600.0f64) {
            let cfg = SyntheticConfig { num_stations: 10, num_requests: 60, horizon: 3600, ..Default::default() };
            let inst = cfg.generate(seed).unwrap();
            let stops = inst.locs();
            let demand = DemandIndex::build(&inst, &[Scenario::all("a", &inst)], &stops, &IndexParams { time_window: 600, walk_limit: Some(limit) }).unwrap();
            let pooling = PoolingIndex::build(&inst.route, &stops, &DetourParams { routing_delay: 60.0, time_window: 600 }, Some(&demand)).unwrap();
            let per_slot = pooling.per_slot.as_ref().unwrap();
            prop_assert_eq!(per_slot.len(), demand.slots().len());
            for (&(s, t), combos) in per_slot {
                let sd = demand.scenario(s);
                prop_assert!(combos.same_source.iter().all(|&i| i < pooling.same_source.len()));
                for &i in &combos.same_dest {
                    // Property: the shifted bucket exists
                    prop_assert!(sd.has_slot(t + pooling.same_dest[i].dt));
                }
            }
        }
    }
}
