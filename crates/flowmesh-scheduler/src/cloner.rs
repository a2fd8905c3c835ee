//! Cloning and uncloning MSU instances across the fleet.

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::*;
use flowmesh_proto::{ControlMessage, RuntimeSender, send_logged};
use flowmesh_routing::{del_endpoint, fix_all_route_ranges, wire_msu};
use flowmesh_stats::StatRegistry;
use tracing::{info, warn};

use crate::topo::wiring_order;

/// Clone an MSU somewhere in the fleet.
///
/// The template's type must be cloneable. The clone gets a fresh id and
/// an empty route list, then runtimes are tried in id order until one
/// takes it (first-fit, not load-aware). Everything created in the pass
/// (the clone plus spawned LOCAL dependencies) is wired consumers
/// first, and on success key ranges are rebalanced fleet-wide.
///
/// A wiring failure is reported without rolling back placements already
/// made. A placement failure on every runtime withdraws the unplaced
/// clone, leaving the graph unchanged.
pub fn clone_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
) -> DfgResult<MsuId> {
    let template = dfg.msu(msu_id)?.clone();
    let ty = dfg.msu_type(template.type_id)?;
    if !ty.cloneable {
        return Err(DfgError::NotCloneable(template.type_id));
    }

    let new_id = dfg.generate_msu_id();
    dfg.insert_msu(template.clone_with_id(new_id))?;

    let runtime_ids: Vec<RuntimeId> = dfg.runtimes.keys().copied().collect();
    let mut placed: Vec<MsuId> = Vec::new();
    let mut last_err = DfgError::NoCapacity(0);
    for runtime_id in runtime_ids {
        match flowmesh_placement::schedule_msu(dfg, stats, sender, new_id, runtime_id) {
            Ok(pass) => {
                placed = pass;
                break;
            }
            Err(err) => {
                if dfg.msu(new_id)?.is_placed() {
                    // The clone landed but a dependency did not. No
                    // rollback; report the failure as-is.
                    return Err(err);
                }
                warn!(runtime_id, %err, "clone placement attempt failed");
                last_err = err;
            }
        }
    }
    if placed.is_empty() {
        // Never placed anywhere. Withdraw the unplaced clone so the
        // graph is unchanged and the id is not consumed.
        dfg.remove_msu(new_id)?;
        return Err(last_err);
    }

    for id in wiring_order(dfg, &placed)? {
        wire_msu(dfg, sender, id)?;
    }
    fix_all_route_ranges(dfg, stats, sender);
    info!(
        template = msu_id,
        clone = new_id,
        created = placed.len(),
        "msu cloned"
    );
    Ok(new_id)
}

/// Remove one MSU from the graph and the fleet: every endpoint
/// referencing it on any runtime first, then the instance itself.
///
/// The delete message's delivery receipt stands in for a deletion
/// acknowledgment from the runtime; it is logged, not awaited.
pub(crate) fn tear_down_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
) -> DfgResult<()> {
    let msu = dfg.msu(msu_id)?.clone();

    let referencing: Vec<RouteId> = dfg
        .runtimes
        .values()
        .flat_map(|rt| rt.routes.values())
        .filter(|route| route.endpoint(msu_id).is_some())
        .map(|route| route.id)
        .collect();
    for route_id in referencing {
        del_endpoint(dfg, sender, route_id, msu_id)?;
    }

    if let Some(placement) = msu.scheduling.placement {
        let delivery = send_logged(
            sender,
            placement.runtime_id,
            placement.thread_id,
            ControlMessage::DeleteMsu {
                msu_id,
                type_id: msu.type_id,
            },
        )?;
        info!(
            msu_id,
            seq = delivery.seq,
            ack = ?delivery.ack,
            "msu deletion delivered"
        );
    }

    stats.unregister_item(msu_id);
    dfg.remove_msu(msu_id)?;
    Ok(())
}

/// Remove a cloned instance, never the last one of its type.
///
/// LOCAL dependency instances on the same runtime that exist in a
/// single copy there are torn down with it, most-dependent first, so a
/// producer is never left routing into a deleted consumer.
pub fn unclone_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
) -> DfgResult<()> {
    let msu = dfg.msu(msu_id)?.clone();
    let ty = dfg.msu_type(msu.type_id)?.clone();
    if ty.instances.len() <= 1 {
        return Err(DfgError::LastInstance(msu_id, msu.type_id));
    }

    let mut group = vec![msu_id];
    if let Some(placement) = msu.scheduling.placement {
        for dep in &ty.dependencies {
            if dep.locality != Locality::Local {
                continue;
            }
            if dfg.instances_of_type_on_runtime(placement.runtime_id, dep.type_id) != 1 {
                continue;
            }
            let Some(dep_id) = dfg.instance_of_type_on_runtime(placement.runtime_id, dep.type_id)
            else {
                continue;
            };
            if dfg.msu_type(dep.type_id)?.instances.len() <= 1 {
                warn!(
                    dep_id,
                    type_id = dep.type_id,
                    "keeping the last instance of a dependency type"
                );
                continue;
            }
            group.push(dep_id);
        }
    }

    // Most-dependent first: the reverse of the wiring order.
    let mut order = wiring_order(dfg, &group)?;
    order.reverse();
    for id in order {
        tear_down_msu(dfg, stats, sender, id)?;
    }
    info!(msu_id, removed = group.len(), "msu uncloned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_proto::RecordingSender;
    use std::net::{IpAddr, Ipv4Addr};

    fn runtime(id: RuntimeId, n_threads: u32) -> RuntimeNode {
        let mut rt = RuntimeNode::new(id, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000, 4);
        for t in 1..=n_threads {
            rt.threads.push(WorkerThread {
                id: t,
                mode: ThreadMode::Pinned,
                msus: Vec::new(),
            });
        }
        rt
    }

    fn msu_type(id: MsuTypeId, dst: &[MsuTypeId]) -> MsuType {
        MsuType {
            id,
            name: format!("type-{id}"),
            meta_routing: MetaRouting {
                src_types: Vec::new(),
                dst_types: dst.to_vec(),
            },
            dependencies: Vec::new(),
            cloneable: true,
            colocation_group: 0,
            fixed_key_ranges: false,
            instances: Vec::new(),
        }
    }

    fn place(dfg: &mut Dfg, id: MsuId, type_id: MsuTypeId, runtime_id: RuntimeId, thread_id: ThreadId) {
        let mut msu = Msu::new(id, type_id, VertexKind::default(), BlockingMode::Blocking, "");
        msu.scheduling.placement = Some(Placement {
            runtime_id,
            thread_id,
        });
        dfg.insert_msu(msu).unwrap();
        dfg.runtime_mut(runtime_id)
            .unwrap()
            .thread_mut(thread_id)
            .unwrap()
            .msus
            .push(id);
    }

    // Scenario: cloneable type with one instance, a runtime with one
    // free thread. The clone lands on the free thread with a new id.
    #[test]
    fn clone_takes_the_free_thread() {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[]));
        dfg.runtimes.insert(1, runtime(1, 2));
        place(&mut dfg, 5, 1, 1, 1);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        let clone_id = clone_msu(&mut dfg, &mut stats, &sender, 5).unwrap();

        assert_ne!(clone_id, 5);
        let clone = dfg.msu(clone_id).unwrap();
        assert_eq!(
            clone.scheduling.placement,
            Some(Placement {
                runtime_id: 1,
                thread_id: 2
            })
        );
        assert_eq!(dfg.msu_type(1).unwrap().instances, vec![5, clone_id]);
    }

    #[test]
    fn clone_of_uncloneable_type_is_refused() {
        let mut dfg = Dfg::new("app", 8800);
        let mut ty = msu_type(1, &[]);
        ty.cloneable = false;
        dfg.msu_types.insert(1, ty);
        dfg.runtimes.insert(1, runtime(1, 2));
        place(&mut dfg, 5, 1, 1, 1);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        assert!(matches!(
            clone_msu(&mut dfg, &mut stats, &sender, 5),
            Err(DfgError::NotCloneable(1))
        ));
    }

    // Scenario: the only runtime is full. The clone fails with
    // NoCapacity and the graph is exactly as before, including the
    // next id to be generated.
    #[test]
    fn exhausted_fleet_leaves_the_graph_unchanged() {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[]));
        dfg.runtimes.insert(1, runtime(1, 1));
        place(&mut dfg, 5, 1, 1, 1);
        let next_id = dfg.generate_msu_id();

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        let err = clone_msu(&mut dfg, &mut stats, &sender, 5).unwrap_err();

        assert!(matches!(err, DfgError::NoCapacity(1)));
        assert_eq!(dfg.msus.len(), 1);
        assert_eq!(dfg.msu_type(1).unwrap().instances, vec![5]);
        assert_eq!(dfg.generate_msu_id(), next_id);
        assert!(sender.sent().is_empty());
    }

    #[test]
    fn clone_starts_with_no_routes_and_gets_wired() {
        // Pipeline 1 -> 2: cloning the producer wires it to the
        // existing consumer instance.
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[2]));
        dfg.msu_types.insert(2, msu_type(2, &[]));
        dfg.runtimes.insert(1, runtime(1, 3));
        place(&mut dfg, 5, 1, 1, 1);
        place(&mut dfg, 6, 2, 1, 2);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        let clone_id = clone_msu(&mut dfg, &mut stats, &sender, 5).unwrap();

        let clone = dfg.msu(clone_id).unwrap();
        assert_eq!(clone.scheduling.routes.len(), 1);
        let route = dfg.route(clone.scheduling.routes[0]).unwrap();
        assert_eq!(route.msu_type_id, 2);
        assert_eq!(route.endpoints[0].msu_id, 6);
    }

    #[test]
    fn second_runtime_takes_the_overflow() {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[]));
        dfg.runtimes.insert(1, runtime(1, 1));
        dfg.runtimes.insert(2, runtime(2, 1));
        place(&mut dfg, 5, 1, 1, 1);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        let clone_id = clone_msu(&mut dfg, &mut stats, &sender, 5).unwrap();

        assert_eq!(
            dfg.msu(clone_id).unwrap().scheduling.placement.unwrap().runtime_id,
            2
        );
    }

    #[test]
    fn last_instance_cannot_be_uncloned() {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[]));
        dfg.runtimes.insert(1, runtime(1, 1));
        place(&mut dfg, 5, 1, 1, 1);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        assert!(matches!(
            unclone_msu(&mut dfg, &mut stats, &sender, 5),
            Err(DfgError::LastInstance(5, 1))
        ));
        assert_eq!(dfg.msu_type(1).unwrap().instances.len(), 1);
    }

    // Scenario: two instances; uncloning one makes its id unresolvable
    // and leaves no endpoint referencing it anywhere.
    #[test]
    fn unclone_scrubs_the_instance_everywhere() {
        let mut dfg = Dfg::new("app", 8800);
        dfg.msu_types.insert(1, msu_type(1, &[2]));
        dfg.msu_types.insert(2, msu_type(2, &[]));
        dfg.runtimes.insert(1, runtime(1, 4));
        place(&mut dfg, 5, 2, 1, 1);
        place(&mut dfg, 6, 2, 1, 2);
        place(&mut dfg, 7, 1, 1, 3);

        let mut stats = StatRegistry::new();
        stats.register_item(6);
        let sender = RecordingSender::new();
        wire_msu(&mut dfg, &sender, 7).unwrap();
        let route_id = dfg.msu(7).unwrap().scheduling.routes[0];
        assert_eq!(dfg.route(route_id).unwrap().endpoints.len(), 2);

        unclone_msu(&mut dfg, &mut stats, &sender, 6).unwrap();

        assert!(dfg.msu(6).is_err());
        assert!(!stats.is_registered(6));
        for rt in dfg.runtimes.values() {
            for route in rt.routes.values() {
                assert!(route.endpoint(6).is_none());
            }
        }
        assert_eq!(dfg.msu_type(2).unwrap().instances, vec![5]);
    }

    #[test]
    fn unclone_takes_sole_local_dependencies_along() {
        let mut dfg = Dfg::new("app", 8800);
        let mut producer = msu_type(1, &[]);
        producer.dependencies.push(Dependency {
            type_id: 2,
            locality: Locality::Local,
        });
        dfg.msu_types.insert(1, producer);
        dfg.msu_types.insert(2, msu_type(2, &[]));
        dfg.runtimes.insert(1, runtime(1, 4));
        dfg.runtimes.insert(2, runtime(2, 4));
        // Instance 5 + sole local dependency 15 on runtime 1; the
        // other copies live on runtime 2.
        place(&mut dfg, 5, 1, 1, 1);
        place(&mut dfg, 15, 2, 1, 2);
        place(&mut dfg, 6, 1, 2, 1);
        place(&mut dfg, 16, 2, 2, 2);

        let mut stats = StatRegistry::new();
        let sender = RecordingSender::new();
        unclone_msu(&mut dfg, &mut stats, &sender, 5).unwrap();

        assert!(dfg.msu(5).is_err());
        assert!(dfg.msu(15).is_err());
        assert!(dfg.msu(6).is_ok());
        assert!(dfg.msu(16).is_ok());
    }
}
