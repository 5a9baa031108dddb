use std::collections::HashMap;
use bit_set::BitSet;
use itertools::Itertools;
use tracing::*;
use vbsdata::CostTable;

use crate::*;
use crate::config::{ClusterMode, ClusterParams};

/// 1-based cluster label.
pub type ClusterId = u32;

const MAX_ALTERNATE_ITERS: usize = 100;
/// Each pass applies the best improving swap.
const MAX_SWAP_PASSES: usize = 200;
const SWAP_TOL: Cost = 1e-9;

/// Zone partition of a station set.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub labels: Map<Loc, ClusterId>,
    /// `medoids[c - 1]` is the medoid of cluster `c`.
    pub medoids: Vec<Loc>,
}

/// Ordered pair of clusters with the aggregated travel cost between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corridor {
    pub from: ClusterId,
    pub to: ClusterId,
    /// `None` only if no member of `from` has a routing arc to a member of `to`.
    pub cost: Option<Cost>,
}

/// Symmetric dissimilarity between the stations, `max(cost(a, b), cost(b, a))`, infinite if either
/// direction is unavailable.
struct Dissimilarity {
    locs: Vec<Loc>,
    d: Vec<Cost>,
}

impl Dissimilarity {
    fn new(route: &CostTable, locs: Vec<Loc>) -> Self {
        let m = locs.len();
        let mut d = vec![0.0; m * m];
        for (a, &i) in locs.iter().enumerate() {
            for (b, &j) in locs.iter().enumerate().skip(a + 1) {
                let x = route.get_or_inf(i, j).max(route.get_or_inf(j, i));
                d[a * m + b] = x;
                d[b * m + a] = x;
            }
        }
        Dissimilarity { locs, d }
    }

    #[inline]
    fn len(&self) -> usize { self.locs.len() }

    #[inline]
    fn get(&self, a: usize, b: usize) -> Cost {
        self.d[a * self.len() + b]
    }

    /// Unavailable pairs replaced by a penalty larger than any sum of finite dissimilarities.
    fn capped(&self) -> Vec<Cost> {
        let max_finite = self.d.iter().copied().filter(|x| x.is_finite()).fold(0.0, Cost::max);
        let penalty = (max_finite + 1.0) * (self.len() as Cost + 1.0);
        self.d.iter().map(|&x| if x.is_finite() { x } else { penalty }).collect()
    }

    /// Member minimising the summed dissimilarity to the others; ties keep `current`, then the
    /// lowest position.
    fn medoid_of(&self, d: &[Cost], members: &[usize], current: Option<usize>) -> usize {
        let m = self.len();
        let total = |x: usize| members.iter().map(|&y| d[x * m + y]).sum::<Cost>();
        let mut best = current.unwrap_or(members[0]);
        let mut best_total = total(best);
        for &x in members {
            let t = total(x);
            if t < best_total {
                best = x;
                best_total = t;
            }
        }
        best
    }
}

/// Partitions `stations` into zones by maximum diameter or by cluster count.  The count must lie in
/// `[1, n]`; exactly one mode must be configured.
#[instrument(level="info", skip(route, stations), fields(n=stations.len()))]
pub fn cluster(route: &CostTable, stations: &[Loc], params: &ClusterParams) -> Result<Clustering, ConfigError> {
    let locs = stations.iter().copied().sorted().dedup().collect_vec();
    let mode = params.mode(locs.len())?;
    let dis = Dissimilarity::new(route, locs);

    let (groups, medoids) = match mode {
        ClusterMode::Diameter(dmax) => {
            let groups = diameter_partition(&dis, dmax);
            let medoids = groups.iter().map(|g| dis.medoid_of(&dis.d, g, None)).collect_vec();
            (groups, medoids)
        },
        ClusterMode::Count(c) => k_medoids(&dis, c),
    };

    let clustering = Clustering::from_groups(&dis, groups, medoids);
    info!(clusters=clustering.num_clusters(), "clustering finished");
    Ok(clustering)
}

/// Greedy clique partition of the compatibility graph `dis <= dmax`, then pairwise merging.
/// Seeds are the most constrained unassigned stations; a cluster grows by the candidate
/// compatible with most of the remaining candidates.  Not guaranteed minimal.
fn diameter_partition(dis: &Dissimilarity, dmax: Cost) -> Vec<Vec<usize>> {
    let m = dis.len();
    let compatible = |a: usize, b: usize| dis.get(a, b) <= dmax;

    let mut unassigned = BitSet::with_capacity(m);
    for a in 0..m { unassigned.insert(a); }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    while !unassigned.is_empty() {
        let seed = match unassigned.iter()
            .min_by_key(|&a| unassigned.iter().filter(|&b| b != a && compatible(a, b)).count()) {
            Some(a) => a,
            None => break,
        };
        let mut members = vec![seed];
        let mut candidates = unassigned.iter().filter(|&b| b != seed && compatible(seed, b)).collect_vec();
        loop {
            // max_by_key keeps the last maximum; reversing makes it the lowest position
            let pick = match candidates.iter()
                .rev()
                .max_by_key(|&&x| candidates.iter().filter(|&&y| y != x && compatible(x, y)).count()) {
                Some(&x) => x,
                None => break,
            };
            members.push(pick);
            candidates.retain(|&y| y != pick && compatible(pick, y));
        }
        for &a in &members { unassigned.remove(a); }
        trace!(seed, size=members.len(), "greedy clique");
        groups.push(members);
    }

    loop {
        let merge = (0..groups.len())
            .tuple_combinations()
            .find(|&(x, y): &(usize, usize)| {
                groups[x].iter().all(|&a| groups[y].iter().all(|&b| compatible(a, b)))
            });
        match merge {
            Some((x, y)) => {
                let g = groups.remove(y);
                groups[x].extend(g);
                trace!(x, y, "merged clusters");
            },
            None => break,
        }
    }
    groups
}

/// Per station: position of the nearest medoid, its distance and the distance to the second
/// nearest medoid.  Needs at least two medoids.
struct NearestMedoids {
    nearest: Vec<usize>,
    dn: Vec<Cost>,
    ds: Vec<Cost>,
}

impl NearestMedoids {
    fn new(d: &[Cost], m: usize, medoids: &[usize]) -> Self {
        debug_assert!(medoids.len() >= 2);
        let mut cache = NearestMedoids { nearest: vec![0; m], dn: vec![Cost::INFINITY; m], ds: vec![Cost::INFINITY; m] };
        for o in 0..m {
            for (ci, &c) in medoids.iter().enumerate() {
                let x = d[o * m + c];
                if x < cache.dn[o] {
                    cache.ds[o] = cache.dn[o];
                    cache.dn[o] = x;
                    cache.nearest[o] = ci;
                } else if x < cache.ds[o] {
                    cache.ds[o] = x;
                }
            }
        }
        cache
    }

    /// Change of the total distance to the nearest medoid when medoid `ci` is replaced by `x`,
    /// for every `ci` at once (FastPAM1).  `removal[ci]` is the loss of dropping medoid `ci`.
    fn swap_deltas(&self, d: &[Cost], m: usize, removal: &[Cost], x: usize, delta: &mut [Cost]) {
        delta.copy_from_slice(removal);
        let mut shared = 0.0;
        for o in 0..m {
            let dox = d[o * m + x];
            let i = self.nearest[o];
            if dox < self.dn[o] {
                shared += dox - self.dn[o];
                delta[i] += self.dn[o] - self.ds[o];
            } else if dox < self.ds[o] {
                delta[i] += dox - self.ds[o];
            }
        }
        for v in delta.iter_mut() { *v += shared; }
    }

    fn removal_loss(&self, k: usize) -> Vec<Cost> {
        let mut removal = vec![0.0; k];
        for o in 0..self.nearest.len() {
            removal[self.nearest[o]] += self.ds[o] - self.dn[o];
        }
        removal
    }
}

/// Position of the nearest medoid for every station; a medoid always maps to its own cluster.
fn assign(d: &[Cost], m: usize, medoids: &[usize]) -> Vec<usize> {
    (0..m)
        .map(|x| {
            if let Some(own) = medoids.iter().position(|&c| c == x) {
                return own;
            }
            let mut best = 0;
            for (ci, &c) in medoids.iter().enumerate().skip(1) {
                if d[x * m + c] < d[x * m + medoids[best]] { best = ci; }
            }
            best
        })
        .collect()
}

fn groups_of(assignment: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); k];
    for (x, &c) in assignment.iter().enumerate() {
        groups[c].push(x);
    }
    groups
}

/// Farthest-point seeding from the 1-medoid, alternating assignment and medoid updates, then a
/// bounded PAM swap phase costing O(m²) per pass.  Medoids stay distinct, so every cluster keeps
/// at least its medoid.
fn k_medoids(dis: &Dissimilarity, k: usize) -> (Vec<Vec<usize>>, Vec<usize>) {
    let m = dis.len();
    let d = dis.capped();

    let mut medoids = Vec::with_capacity(k);
    let first = dis.medoid_of(&d, &(0..m).collect_vec(), None);
    medoids.push(first);
    while medoids.len() < k {
        let next = (0..m)
            .filter(|x| !medoids.contains(x))
            .map(|x| (x, medoids.iter().map(|&c| d[x * m + c]).fold(Cost::INFINITY, Cost::min)))
            .fold(None, |best: Option<(usize, Cost)>, (x, dist)| match best {
                Some((_, bd)) if bd >= dist => best,
                _ => Some((x, dist)),
            });
        match next {
            Some((x, _)) => medoids.push(x),
            None => break,
        }
    }
    debug!(?medoids, "seeded medoids");

    for iter in 0..MAX_ALTERNATE_ITERS {
        let groups = groups_of(&assign(&d, m, &medoids), k);
        let updated = groups.iter()
            .zip(&medoids)
            .map(|(g, &c)| dis.medoid_of(&d, g, Some(c)))
            .collect_vec();
        if updated == medoids {
            trace!(iter, "alternate phase converged");
            break;
        }
        medoids = updated;
    }

    // a single medoid is already the 1-medoid
    if k >= 2 {
        let mut is_medoid = BitSet::with_capacity(m);
        for &c in &medoids { is_medoid.insert(c); }
        let mut delta = vec![0.0; k];
        for pass in 0..MAX_SWAP_PASSES {
            let cache = NearestMedoids::new(&d, m, &medoids);
            let removal = cache.removal_loss(k);
            let mut best: Option<(Cost, usize, usize)> = None;
            for x in (0..m).filter(|&x| !is_medoid.contains(x)) {
                cache.swap_deltas(&d, m, &removal, x, &mut delta);
                for (ci, &change) in delta.iter().enumerate() {
                    if change < -SWAP_TOL && best.map_or(true, |(b, _, _)| change < b) {
                        best = Some((change, ci, x));
                    }
                }
            }
            match best {
                Some((change, ci, x)) => {
                    trace!(pass, old=medoids[ci], new=x, change, "swap");
                    is_medoid.remove(medoids[ci]);
                    is_medoid.insert(x);
                    medoids[ci] = x;
                },
                None => break,
            }
        }
    }

    let groups = groups_of(&assign(&d, m, &medoids), k);
    debug_assert!(groups.iter().all(|g| !g.is_empty()));
    (groups, medoids)
}

impl Clustering {
    /// Labels clusters 1.. in order of their smallest station.
    fn from_groups(dis: &Dissimilarity, groups: Vec<Vec<usize>>, medoids: Vec<usize>) -> Self {
        let order = (0..groups.len())
            .sorted_by_key(|&g| groups[g].iter().map(|&a| dis.locs[a]).min())
            .collect_vec();
        let mut labels = Map::default();
        let mut sorted_medoids = Vec::with_capacity(groups.len());
        for (c, &g) in order.iter().enumerate() {
            for &a in &groups[g] {
                labels.insert(dis.locs[a], c as ClusterId + 1);
            }
            sorted_medoids.push(dis.locs[medoids[g]]);
        }
        Clustering { labels, medoids: sorted_medoids }
    }

    #[inline]
    pub fn num_clusters(&self) -> usize { self.medoids.len() }

    #[inline]
    pub fn label(&self, loc: Loc) -> Option<ClusterId> {
        self.labels.get(&loc).copied()
    }

    /// Label of `loc`, or, if `loc` was not clustered, the label of the clustered station with the
    /// smallest `dist` to it.  Ties go to the smaller station.  `None` if nothing is reachable.
    pub fn nearest_label(&self, loc: Loc, dist: impl Fn(Loc) -> Option<Cost>) -> Option<ClusterId> {
        if let Some(c) = self.label(loc) {
            return Some(c);
        }
        self.labels.iter()
            .filter_map(|(&s, &c)| dist(s).map(|x| (x, s, c)))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, _, c)| c)
    }

    #[inline]
    pub fn medoid(&self, c: ClusterId) -> Loc {
        self.medoids[c as usize - 1]
    }

    /// Members of cluster `c`, sorted.
    pub fn members(&self, c: ClusterId) -> Vec<Loc> {
        self.labels.iter().filter(|(_, &l)| l == c).map(|(&loc, _)| loc).sorted().collect()
    }

    pub fn cluster_ids(&self) -> std::ops::RangeInclusive<ClusterId> {
        1..=self.medoids.len() as ClusterId
    }

    /// Largest routing cost between two members in either direction; infinite if some member pair
    /// has no routing arc.
    pub fn diameter(&self, route: &CostTable, c: ClusterId) -> Cost {
        self.members(c).into_iter()
            .tuple_combinations()
            .map(|(a, b)| route.get_or_inf(a, b).max(route.get_or_inf(b, a)))
            .fold(0.0, Cost::max)
    }

    /// Summed routing cost from each station to its medoid.
    pub fn dispersion(&self, route: &CostTable) -> Cost {
        self.labels.iter().map(|(&loc, &c)| route.get_or_inf(loc, self.medoid(c))).sum()
    }

    /// Every ordered cluster pair.  Off the diagonal the cost is the routing cost between the
    /// medoids, falling back to the cheapest member-to-member arc if the medoids are not connected.
    #[instrument(level="debug", skip(self, route))]
    pub fn corridors(&self, route: &CostTable) -> Vec<Corridor> {
        let members = self.cluster_ids().map(|c| self.members(c)).collect_vec();
        self.cluster_ids()
            .cartesian_product(self.cluster_ids())
            .map(|(a, b)| {
                let cost = if a == b {
                    Some(0.0)
                } else {
                    route.get(self.medoid(a), self.medoid(b)).or_else(|| {
                        let ma = &members[a as usize - 1];
                        let mb = &members[b as usize - 1];
                        ma.iter()
                            .cartesian_product(mb.iter())
                            .filter_map(|(&i, &j)| route.get(i, j))
                            .fold(None, |acc: Option<Cost>, c| Some(acc.map_or(c, |x| x.min(c))))
                    })
                };
                if cost.is_none() { warn!(a, b, "corridor without routing arc"); }
                Corridor { from: a, to: b, cost }
            })
            .collect()
    }

    pub fn size_info(&self) -> HashMap<String, isize> {
        let mut info = HashMap::default();
        info.insert("clusters".to_string(), self.num_clusters() as isize);
        info.insert("largest_cluster".to_string(),
                    self.cluster_ids().map(|c| self.members(c).len()).max().unwrap_or(0) as isize);
        info
    }
}
