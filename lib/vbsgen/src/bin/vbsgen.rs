use json::{self, JsonValue};
use rayon::ThreadPoolBuilder;
use std::collections::HashMap;
use itertools::Itertools;
use anyhow::Result;
use tracing::*;

use vbsdata::{Instance, Scenario};
use vbsdata::synthetic::SyntheticConfig;
use vbsgen::*;
use vbsgen::config::{ClusterParams, DetourParams, IndexParams};
use vbsgen::demand::DemandIndex;
use vbsgen::detour::PoolingIndex;
use vbsgen::cluster::{Clustering, Corridor};
use vbsgen::warmstart::{CoarseSolution, WarmStart};

mod common;
use common::*;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct ClArgs {
    /// Number of stations in the synthetic instance
    #[structopt(long, default_value="30", validator=bounded(Some(1), None))]
    stations: usize,
    #[structopt(long, default_value="200")]
    requests: usize,
    #[structopt(long, default_value="0")]
    seed: u64,
    /// Request timestamps are drawn from [0, horizon) seconds
    #[structopt(long, default_value="14400", validator=bounded(Some(1), None))]
    horizon: Timestamp,
    /// Number of equal-length scenarios the horizon is split into
    #[structopt(long, default_value="1", validator=bounded(Some(1), None))]
    scenarios: usize,
    /// Only every k-th station may serve as a virtual stop
    #[structopt(long="stop-every", default_value="1", validator=bounded(Some(1), None))]
    stop_every: usize,
    #[structopt(long="time-window", short="w", default_value="300", validator=bounded(Some(1), None))]
    time_window: Timestamp,
    #[structopt(long="walk-limit", validator=bounded(Some(0.0), None))]
    walk_limit: Option<Cost>,
    #[structopt(long="delay", short="d", default_value="60", validator=bounded(Some(0.0), None))]
    routing_delay: Cost,
    #[structopt(long="max-diameter", conflicts_with="clusters", validator=bounded(Some(0.0), None))]
    max_diameter: Option<Cost>,
    #[structopt(long="clusters", short="k", validator=bounded(Some(1), None))]
    clusters: Option<usize>,
    #[structopt(long, short="c", default_value="1", validator=bounded(Some(1), None))]
    cpus: usize,
    #[structopt(flatten)]
    output: OutputOptions,
}

struct Zones {
    clustering: Clustering,
    corridors: Vec<Corridor>,
    warm_start: WarmStart,
}

struct Precomputation {
    instance: Instance,
    demand: DemandIndex,
    pooling: PoolingIndex,
    zones: Option<Zones>,
    size_info: HashMap<String, isize>,
}

impl Precomputation {
    fn new(instance: Instance, demand: DemandIndex, pooling: PoolingIndex, zones: Option<Zones>) -> Self {
        let mut size_info = HashMap::default();
        size_info.insert("stations".to_string(), instance.num_stations() as isize);
        size_info.insert("scenarios".to_string(), demand.scenarios.len() as isize);
        size_info.extend(demand.size_info());
        size_info.extend(pooling.size_info());
        if let Some(z) = &zones {
            size_info.extend(z.clustering.size_info());
            size_info.extend(z.warm_start.size_info());
        }
        Precomputation { instance, demand, pooling, zones, size_info }
    }
}

fn pair(a: Loc, b: Loc) -> JsonValue {
    json::array![a, b]
}

fn demand_json(demand: &DemandIndex) -> JsonValue {
    let scenarios: JsonValue = demand.scenarios.iter()
        .map(|sd| {
            let cells: JsonValue = sd.time_ids().into_iter()
                .flat_map(move |t| sd.od_pairs_at(t).iter().map(move |&od| (t, od)))
                .map(|(t, od)| json::object! {
                    t: t,
                    od: pair(od.0, od.1),
                    q: sd.demand(t, od),
                })
                .collect_vec()
                .into();
            json::object! {
                label: sd.label.clone(),
                start: sd.start,
                requests: sd.num_requests,
                cells: cells,
            }
        })
        .collect_vec()
        .into();

    let candidates: JsonValue = match &demand.candidates {
        None => JsonValue::Null,
        Some(c) => c.iter()
            .sorted_by_key(|(od, _)| **od)
            .map(|(&od, c)| json::object! {
                od: pair(od.0, od.1),
                pickups: c.pickups.clone(),
                dropoffs: c.dropoffs.clone(),
            })
            .collect_vec()
            .into(),
    };

    json::object! {
        time_window: demand.time_window,
        walk_limit: demand.walk_limit,
        scenarios: scenarios,
        candidates: candidates,
    }
}

fn pooling_json(pooling: &PoolingIndex) -> JsonValue {
    let same_source: JsonValue = pooling.same_source.iter()
        .map(|c| json::array![c.j, c.k, c.l])
        .collect_vec()
        .into();
    let same_dest: JsonValue = pooling.same_dest.iter()
        .map(|c| json::array![c.j, c.k, c.l, c.dt])
        .collect_vec()
        .into();
    let slots: JsonValue = match &pooling.per_slot {
        None => JsonValue::Null,
        Some(per_slot) => per_slot.iter()
            .sorted_by_key(|(slot, _)| **slot)
            .map(|(&(s, t), combos)| json::object! {
                scenario: s,
                t: t,
                same_source: combos.same_source.clone(),
                same_dest: combos.same_dest.clone(),
            })
            .collect_vec()
            .into(),
    };
    json::object! {
        routing_delay: pooling.routing_delay,
        same_source: same_source,
        same_dest: same_dest,
        slots: slots,
    }
}

fn zones_json(zones: &Zones, instance: &Instance) -> JsonValue {
    let c = &zones.clustering;
    let labels: JsonValue = c.labels.iter()
        .sorted()
        .map(|(&loc, &id)| json::array![loc, id])
        .collect_vec()
        .into();
    let corridors: JsonValue = zones.corridors.iter()
        .map(|k| json::object! { from: k.from, to: k.to, cost: k.cost })
        .collect_vec()
        .into();

    let ws = &zones.warm_start;
    let assignments: JsonValue = ws.assignments.iter()
        .sorted_by_key(|(cell, _)| **cell)
        .map(|(&(s, t, od), a)| json::object! {
            scenario: s,
            t: t,
            od: pair(od.0, od.1),
            pickup: a.pickup,
            dropoff: a.dropoff,
            position: a.position,
        })
        .collect_vec()
        .into();
    let triples = |set: &Set<(ScenarioIdx, TimeId, usize)>| -> JsonValue {
        set.iter().sorted().map(|&(s, t, i)| json::array![s, t, i]).collect_vec().into()
    };

    json::object! {
        labels: labels,
        medoids: c.medoids.clone(),
        dispersion: c.dispersion(&instance.route),
        corridors: corridors,
        warm_start: json::object! {
            assignments: assignments,
            same_source: triples(&ws.same_source),
            same_dest: triples(&ws.same_dest),
            skipped: ws.skipped,
            missing: ws.missing,
        },
    }
}

impl Report for Precomputation {
    fn size_info(&self) -> &HashMap<String, isize> {
        &self.size_info
    }

    fn to_json(&self) -> JsonValue {
        json::object! {
            instance: self.instance.id.clone(),
            demand: demand_json(&self.demand),
            pooling: pooling_json(&self.pooling),
            zones: self.zones.as_ref().map_or(JsonValue::Null, |z| zones_json(z, &self.instance)),
            size_info: self.size_info.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args : ClArgs = StructOpt::from_args();
    let _g = init_logging(args.output.log.clone())?;
    debug!(?args);
    ThreadPoolBuilder::new().num_threads(args.cpus).build_global()?;

    let synthetic = SyntheticConfig {
        num_stations: args.stations,
        num_requests: args.requests,
        horizon: args.horizon,
        ..Default::default()
    };
    let instance = synthetic.generate(args.seed)?;
    info!(min=?instance.route.min_cost(), max=?instance.route.max_cost(), "routing costs");
    let count = args.scenarios as Timestamp;
    let period = (args.horizon + count - 1) / count;
    let scenarios = Scenario::split_by_period(&instance, 0, period, args.scenarios, "scenario")?;
    let stops = instance.locs().into_iter().step_by(args.stop_every).collect_vec();

    let index_params = IndexParams { time_window: args.time_window, walk_limit: args.walk_limit };
    let demand = DemandIndex::build(&instance, &scenarios, &stops, &index_params)?;
    let detour_params = DetourParams { routing_delay: args.routing_delay, time_window: args.time_window };
    let pooling = PoolingIndex::build(&instance.route, &stops, &detour_params, Some(&demand))?;

    let cluster_params = ClusterParams { max_diameter: args.max_diameter, num_clusters: args.clusters };
    let zones = if cluster_params == ClusterParams::default() {
        info!("no clustering parameters given, skipping zones and warm start");
        None
    } else {
        let clustering = cluster::cluster(&instance.route, &stops, &cluster_params)?;
        let corridors = clustering.corridors(&instance.route);
        let coarse = CoarseSolution::zone_of_endpoints(&clustering, &demand, &instance.walk);
        let warm_start = warmstart::project(&coarse, &demand, &pooling);
        Some(Zones { clustering, corridors, warm_start })
    };

    let report = Precomputation::new(instance, demand, pooling, zones);
    output_report(&args.output, &report)?;
    Ok(())
}
