use std::collections::HashMap;
use itertools::Itertools;
use tracing::*;
use vbsdata::CostTable;

use crate::*;
use crate::cluster::{ClusterId, Clustering};
use crate::demand::DemandIndex;
use crate::detour::PoolingIndex;

/// One (scenario, bucket, OD pair) cell of the fine assignment.
pub type CellKey = (ScenarioIdx, TimeId, OdPair);

/// One (pickup, dropoff) decision per scenario and OD pair, computed in a coarse index space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoarseSolution {
    pub choice: Map<(ScenarioIdx, OdPair), (Loc, Loc)>,
}

impl CoarseSolution {
    pub fn new() -> Self { Self::default() }

    pub fn choose(&mut self, s: ScenarioIdx, od: OdPair, pickup: Loc, dropoff: Loc) {
        self.choice.insert((s, od), (pickup, dropoff));
    }

    /// Lifts zone-level decisions `(s, od) -> (pickup zone, dropoff zone)` to the zone medoids.
    /// Decisions naming a zone the clustering does not have are dropped.
    pub fn from_zones(clustering: &Clustering, zones: &Map<(ScenarioIdx, OdPair), (ClusterId, ClusterId)>) -> Self {
        let valid = |c: ClusterId| c >= 1 && c as usize <= clustering.num_clusters();
        let choice = zones.iter()
            .filter(|(_, &(a, b))| valid(a) && valid(b))
            .map(|(&key, &(a, b))| (key, (clustering.medoid(a), clustering.medoid(b))))
            .collect();
        CoarseSolution { choice }
    }

    /// Every OD pair of `demand` served between the zones of its origin and its destination.  An
    /// endpoint outside the clustered stations takes the zone of the clustered station closest to
    /// it on foot: walking from the origin, walking to the destination.
    pub fn zone_of_endpoints(clustering: &Clustering, demand: &DemandIndex, walk: &CostTable) -> Self {
        let mut zones = Map::default();
        for (s, sd) in demand.scenarios.iter().enumerate() {
            for od in sd.od_pairs() {
                let a = clustering.nearest_label(od.0, |x| walk.get(od.0, x));
                let b = clustering.nearest_label(od.1, |x| walk.get(x, od.1));
                match (a, b) {
                    (Some(a), Some(b)) => { zones.insert((s, od), (a, b)); },
                    _ => trace!(s, ?od, "endpoint without a zone"),
                }
            }
        }
        Self::from_zones(clustering, &zones)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedAssignment {
    pub pickup: Loc,
    pub dropoff: Loc,
    /// Position of the pair in the OD pair's candidate set; `None` without candidate sets.
    pub position: Option<usize>,
}

/// Initial values for the fine assignment, flow and pooling variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmStart {
    pub assignments: Map<CellKey, ProjectedAssignment>,
    /// Vehicle legs `(s, t, from, to)` used by some projected assignment.
    pub flows: Set<(ScenarioIdx, TimeId, Loc, Loc)>,
    /// `(s, t, i)` with `i` an index into [`PoolingIndex::same_source`].
    pub same_source: Set<(ScenarioIdx, TimeId, usize)>,
    /// `(s, t, i)` with `i` an index into [`PoolingIndex::same_dest`]; `t` is the first pickup's bucket.
    pub same_dest: Set<(ScenarioIdx, TimeId, usize)>,
    /// Cells whose coarse choice is not in the fine candidate set.
    pub skipped: usize,
    /// Cells without a coarse choice.
    pub missing: usize,
}

impl WarmStart {
    #[inline]
    pub fn assignment(&self, cell: CellKey) -> Option<&ProjectedAssignment> {
        self.assignments.get(&cell)
    }

    pub fn size_info(&self) -> HashMap<String, isize> {
        let mut info = HashMap::default();
        info.insert("ws_assignments".to_string(), self.assignments.len() as isize);
        info.insert("ws_flows".to_string(), self.flows.len() as isize);
        info.insert("ws_same_source".to_string(), self.same_source.len() as isize);
        info.insert("ws_same_dest".to_string(), self.same_dest.len() as isize);
        info.insert("ws_skipped".to_string(), self.skipped as isize);
        info.insert("ws_missing".to_string(), self.missing as isize);
        info
    }
}

/// Projects `coarse` onto every cell of `demand` and derives the flow and pooling hints.  A pooling
/// combination is only marked used when both of its legs carry a projected assignment; no
/// attempt is made to complete a pooling plan.
#[instrument(level="info", skip_all)]
pub fn project(coarse: &CoarseSolution, demand: &DemandIndex, pooling: &PoolingIndex) -> WarmStart {
    let mut ws = WarmStart::default();
    let mut legs: Map<SlotKey, Set<(Loc, Loc)>> = Map::default();

    for (s, sd) in demand.scenarios.iter().enumerate() {
        for t in sd.time_ids() {
            for &od in sd.od_pairs_at(t) {
                let (pickup, dropoff) = match coarse.choice.get(&(s, od)) {
                    Some(&c) => c,
                    None => {
                        ws.missing += 1;
                        continue;
                    }
                };
                let position = match demand.candidates_for(od) {
                    None => None,
                    Some(c) => match c.position(pickup, dropoff) {
                        Some(pos) => Some(pos),
                        None => {
                            debug!(s, t, ?od, pickup, dropoff, "coarse choice outside candidate set");
                            ws.skipped += 1;
                            continue;
                        }
                    },
                };
                ws.assignments.insert((s, t, od), ProjectedAssignment { pickup, dropoff, position });
                if pickup != dropoff {
                    ws.flows.insert((s, t, pickup, dropoff));
                    legs.entry((s, t)).or_default().insert((pickup, dropoff));
                }
            }
        }
    }

    // Two different legs of one bucket always come from two different OD pairs, since each cell
    // holds a single assignment.
    for &(s, t) in legs.keys().sorted() {
        let here = &legs[&(s, t)];
        for (i, c) in pooling.same_source_at((s, t)) {
            if here.contains(&(c.j, c.k)) && here.contains(&(c.j, c.l)) {
                trace!(s, t, i, "same-source used");
                ws.same_source.insert((s, t, i));
            }
        }
        for (i, c) in pooling.same_dest_at((s, t)) {
            if !here.contains(&(c.j, c.l)) { continue; }
            let second = t.checked_add(c.dt)
                .and_then(|later| legs.get(&(s, later)))
                .map_or(false, |there| there.contains(&(c.k, c.l)));
            if second {
                trace!(s, t, i, "same-dest used");
                ws.same_dest.insert((s, t, i));
            }
        }
    }

    if ws.skipped > 0 || ws.missing > 0 {
        warn!(skipped=ws.skipped, missing=ws.missing, "cells left without a warm start value");
    }
    info!(assignments=ws.assignments.len(), same_source=ws.same_source.len(), same_dest=ws.same_dest.len(), "warm start projected");
    ws
}
