//! The clone/unclone decision loop.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use flowmesh_dfg::types::{Dfg, MsuTypeId};
use flowmesh_placement::could_clone_type;
use flowmesh_proto::{RuntimeSender, StatKind};
use flowmesh_routing::fix_all_route_ranges;
use flowmesh_scheduler::{clone_msu, unclone_msu};
use flowmesh_stats::StatRegistry;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// Types the autoscaler may scale. Types not listed are left alone.
    pub types: Vec<MsuTypeId>,
    /// Number of most recent queue-length samples per instance to
    /// aggregate over.
    pub window: usize,
    /// Minimum time between clone decisions for one type.
    pub clone_cooldown: Duration,
    /// Minimum time between unclone decisions for one type. Longer
    /// than the clone cooldown so scale-down lags scale-up.
    pub unclone_cooldown: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            window: 10,
            clone_cooldown: Duration::from_secs(5),
            unclone_cooldown: Duration::from_secs(20),
        }
    }
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    /// Last clone/unclone decision per type, for hysteresis.
    last_decision: BTreeMap<MsuTypeId, Instant>,
    /// Instance count observed at the first pass; uncloning never goes
    /// below it.
    startup_floor: BTreeMap<MsuTypeId, usize>,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig) -> Self {
        Self {
            config,
            last_decision: BTreeMap::new(),
            startup_floor: BTreeMap::new(),
        }
    }

    fn cooldown_elapsed(&self, type_id: MsuTypeId, cooldown: Duration) -> bool {
        self.last_decision
            .get(&type_id)
            .is_none_or(|at| at.elapsed() >= cooldown)
    }

    /// Queue-length aggregates over every sampled instance of a type.
    /// `None` when no instance has samples yet.
    fn window_aggregates(
        &self,
        dfg: &Dfg,
        stats: &StatRegistry,
        type_id: MsuTypeId,
    ) -> Option<(f64, f64)> {
        let ty = dfg.msu_types.get(&type_id)?;
        let mut min_of_mins: Option<f64> = None;
        let mut min_of_maxes: Option<f64> = None;
        for msu_id in &ty.instances {
            let Some(series) = stats.series(StatKind::QueueLength, *msu_id) else {
                continue;
            };
            let (Some(min), Some(max)) = (
                series.min_over(self.config.window),
                series.max_over(self.config.window),
            ) else {
                continue;
            };
            min_of_mins = Some(min_of_mins.map_or(min, |m| m.min(min)));
            min_of_maxes = Some(min_of_maxes.map_or(max, |m| m.min(max)));
        }
        Some((min_of_mins?, min_of_maxes?))
    }

    /// One scaling pass over every configured type. Runs after each
    /// telemetry batch; any failure is a no-op until the next batch.
    pub fn tick(&mut self, dfg: &mut Dfg, stats: &mut StatRegistry, sender: &dyn RuntimeSender) {
        let mut scaled = false;
        for type_id in self.config.types.clone() {
            let Some(ty) = dfg.msu_types.get(&type_id) else {
                warn!(type_id, "configured autoscale type does not exist");
                continue;
            };
            let instances = ty.instances.clone();
            let floor = *self
                .startup_floor
                .entry(type_id)
                .or_insert(instances.len());
            if instances.is_empty() {
                continue;
            }

            let Some((min_of_mins, min_of_maxes)) = self.window_aggregates(dfg, stats, type_id)
            else {
                debug!(type_id, "no telemetry yet, skipping");
                continue;
            };

            if min_of_mins > 0.0 {
                if !self.cooldown_elapsed(type_id, self.config.clone_cooldown) {
                    debug!(type_id, "saturated but in clone cooldown");
                    continue;
                }
                if !could_clone_type(dfg, type_id) {
                    debug!(type_id, "saturated but no capacity for a clone");
                    continue;
                }
                match clone_msu(dfg, stats, sender, instances[0]) {
                    Ok(clone_id) => {
                        info!(type_id, clone_id, min_of_mins, "scaled up");
                        self.last_decision.insert(type_id, Instant::now());
                        scaled = true;
                    }
                    Err(err) => warn!(type_id, %err, "scale-up failed"),
                }
            } else if instances.len() > floor && min_of_maxes == 0.0 {
                if !self.cooldown_elapsed(type_id, self.config.unclone_cooldown) {
                    debug!(type_id, "idle but in unclone cooldown");
                    continue;
                }
                let target = *instances.last().unwrap();
                match unclone_msu(dfg, stats, sender, target) {
                    Ok(()) => {
                        info!(type_id, removed = target, "scaled down");
                        self.last_decision.insert(type_id, Instant::now());
                        scaled = true;
                    }
                    Err(err) => warn!(type_id, %err, "scale-down failed"),
                }
            }
        }
        if scaled {
            fix_all_route_ranges(dfg, stats, sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_dfg::types::*;
    use flowmesh_proto::{RecordingSender, StatSample, TimedValue};
    use std::net::{IpAddr, Ipv4Addr};

    fn fixture(n_threads: u32) -> Dfg {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(
            1,
            MsuType {
                id: 1,
                name: "handler".to_string(),
                meta_routing: MetaRouting::default(),
                dependencies: Vec::new(),
                cloneable: true,
                colocation_group: 0,
                fixed_key_ranges: false,
                instances: Vec::new(),
            },
        );
        let mut rt = RuntimeNode::new(1, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000, 4);
        for t in 1..=n_threads {
            rt.threads.push(WorkerThread {
                id: t,
                mode: ThreadMode::Pinned,
                msus: Vec::new(),
            });
        }
        dfg.runtimes.insert(1, rt);
        dfg
    }

    fn place(dfg: &mut Dfg, id: MsuId, thread_id: ThreadId) {
        let mut msu = Msu::new(id, 1, VertexKind::default(), BlockingMode::Blocking, "");
        msu.scheduling.placement = Some(Placement {
            runtime_id: 1,
            thread_id,
        });
        dfg.insert_msu(msu).unwrap();
        dfg.runtime_mut(1)
            .unwrap()
            .thread_mut(thread_id)
            .unwrap()
            .msus
            .push(id);
    }

    fn feed_queue(stats: &mut StatRegistry, msu_id: MsuId, values: &[f64]) {
        stats.register_item(msu_id);
        stats.append(&StatSample {
            kind: StatKind::QueueLength,
            item_id: msu_id,
            values: values
                .iter()
                .enumerate()
                .map(|(i, v)| TimedValue {
                    secs: i as i64 + 1,
                    nanos: 0,
                    value: *v,
                })
                .collect(),
        });
    }

    fn config(types: &[MsuTypeId]) -> AutoscalerConfig {
        AutoscalerConfig {
            types: types.to_vec(),
            window: 5,
            clone_cooldown: Duration::ZERO,
            unclone_cooldown: Duration::ZERO,
        }
    }

    #[test]
    fn persistently_saturated_type_scales_up() {
        let mut dfg = fixture(2);
        place(&mut dfg, 5, 1);
        let mut stats = StatRegistry::new();
        feed_queue(&mut stats, 5, &[3.0, 2.0, 4.0]);

        let mut scaler = Autoscaler::new(config(&[1]));
        let sender = RecordingSender::new();
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 2);
    }

    #[test]
    fn an_idle_dip_prevents_scale_up() {
        let mut dfg = fixture(2);
        place(&mut dfg, 5, 1);
        let mut stats = StatRegistry::new();
        // Dropped to zero once within the window: not saturated.
        feed_queue(&mut stats, 5, &[3.0, 0.0, 4.0]);

        let mut scaler = Autoscaler::new(config(&[1]));
        let sender = RecordingSender::new();
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 1);
    }

    #[test]
    fn clone_cooldown_blocks_back_to_back_scale_ups() {
        let mut dfg = fixture(3);
        place(&mut dfg, 5, 1);
        let mut stats = StatRegistry::new();
        feed_queue(&mut stats, 5, &[3.0, 2.0]);

        let mut cfg = config(&[1]);
        cfg.clone_cooldown = Duration::from_secs(3600);
        let mut scaler = Autoscaler::new(cfg);
        let sender = RecordingSender::new();

        scaler.tick(&mut dfg, &mut stats, &sender);
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 2);
    }

    #[test]
    fn no_capacity_means_no_decision() {
        let mut dfg = fixture(1); // the only thread is occupied
        place(&mut dfg, 5, 1);
        let mut stats = StatRegistry::new();
        feed_queue(&mut stats, 5, &[3.0, 2.0]);

        let mut scaler = Autoscaler::new(config(&[1]));
        let sender = RecordingSender::new();
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 1);
        assert!(sender.sent().is_empty());
    }

    #[test]
    fn fully_idle_extra_instance_scales_down() {
        let mut dfg = fixture(2);
        place(&mut dfg, 5, 1);
        let mut scaler = Autoscaler::new(config(&[1]));
        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();

        // First pass records the floor of one instance.
        feed_queue(&mut stats, 5, &[0.0]);
        scaler.tick(&mut dfg, &mut stats, &sender);
        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 1);

        place(&mut dfg, 6, 2);
        feed_queue(&mut stats, 6, &[0.0, 0.0]);
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances, vec![5]);
    }

    #[test]
    fn busy_fleet_is_not_scaled_down() {
        let mut dfg = fixture(2);
        place(&mut dfg, 5, 1);
        let mut scaler = Autoscaler::new(config(&[1]));
        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        scaler.tick(&mut dfg, &mut stats, &sender); // record floor = 1

        place(&mut dfg, 6, 2);
        // Every instance peaks above zero within the window, so
        // min-of-maxes stays positive and nothing is retired.
        feed_queue(&mut stats, 5, &[1.0, 2.0]);
        feed_queue(&mut stats, 6, &[0.0, 4.0]);
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 2);
    }

    #[test]
    fn unsampled_types_are_skipped() {
        let mut dfg = fixture(2);
        place(&mut dfg, 5, 1);
        let mut stats = StatRegistry::new();

        let mut scaler = Autoscaler::new(config(&[1]));
        let sender = RecordingSender::new();
        scaler.tick(&mut dfg, &mut stats, &sender);

        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 1);
        assert!(sender.sent().is_empty());
    }
}
