//! Lookup and mutation operations over the dataflow graph.
//!
//! All ids are resolved by scanning ordered maps, so iteration order is
//! deterministic (ascending id). Route ids are unique per runtime; MSU
//! and type ids are global.

use tracing::debug;

use crate::error::{DfgError, DfgResult};
use crate::types::*;

/// Route ids are allocated as the first unused id below this cap.
pub const MAX_ROUTE_ID: RouteId = 10_000;

impl Dfg {
    // ── Lookups ────────────────────────────────────────────────────

    pub fn msu(&self, id: MsuId) -> DfgResult<&Msu> {
        self.msus.get(&id).ok_or(DfgError::NotFound("msu", id))
    }

    pub fn msu_mut(&mut self, id: MsuId) -> DfgResult<&mut Msu> {
        self.msus.get_mut(&id).ok_or(DfgError::NotFound("msu", id))
    }

    pub fn msu_type(&self, id: MsuTypeId) -> DfgResult<&MsuType> {
        self.msu_types
            .get(&id)
            .ok_or(DfgError::NotFound("msu type", id))
    }

    pub fn msu_type_mut(&mut self, id: MsuTypeId) -> DfgResult<&mut MsuType> {
        self.msu_types
            .get_mut(&id)
            .ok_or(DfgError::NotFound("msu type", id))
    }

    pub fn runtime(&self, id: RuntimeId) -> DfgResult<&RuntimeNode> {
        self.runtimes
            .get(&id)
            .ok_or(DfgError::NotFound("runtime", id))
    }

    pub fn runtime_mut(&mut self, id: RuntimeId) -> DfgResult<&mut RuntimeNode> {
        self.runtimes
            .get_mut(&id)
            .ok_or(DfgError::NotFound("runtime", id))
    }

    /// Find a route by id across all runtimes.
    pub fn route(&self, id: RouteId) -> DfgResult<&Route> {
        self.runtimes
            .values()
            .find_map(|rt| rt.routes.get(&id))
            .ok_or(DfgError::NotFound("route", id))
    }

    pub fn route_mut(&mut self, id: RouteId) -> DfgResult<&mut Route> {
        self.runtimes
            .values_mut()
            .find_map(|rt| rt.routes.get_mut(&id))
            .ok_or(DfgError::NotFound("route", id))
    }

    /// The first instance of a type placed on the given runtime, if any.
    pub fn instance_of_type_on_runtime(
        &self,
        runtime_id: RuntimeId,
        type_id: MsuTypeId,
    ) -> Option<MsuId> {
        let ty = self.msu_types.get(&type_id)?;
        ty.instances.iter().copied().find(|id| {
            self.msus
                .get(id)
                .and_then(|m| m.scheduling.placement)
                .is_some_and(|p| p.runtime_id == runtime_id)
        })
    }

    /// How many instances of a type are placed on the given runtime.
    pub fn instances_of_type_on_runtime(
        &self,
        runtime_id: RuntimeId,
        type_id: MsuTypeId,
    ) -> usize {
        let Some(ty) = self.msu_types.get(&type_id) else {
            return 0;
        };
        ty.instances
            .iter()
            .filter(|id| {
                self.msus
                    .get(id)
                    .and_then(|m| m.scheduling.placement)
                    .is_some_and(|p| p.runtime_id == runtime_id)
            })
            .count()
    }

    // ── Id generation ──────────────────────────────────────────────

    /// Next MSU id: one past the largest id in use, starting at 1.
    ///
    /// Derived by scan, so a generated id that is never inserted does
    /// not advance the id space.
    pub fn generate_msu_id(&self) -> MsuId {
        self.msus.keys().next_back().map_or(1, |max| max + 1)
    }

    /// First unused route id below [`MAX_ROUTE_ID`].
    pub fn generate_route_id(&self) -> DfgResult<RouteId> {
        for id in 1..MAX_ROUTE_ID {
            if self.route(id).is_err() {
                return Ok(id);
            }
        }
        Err(DfgError::InvalidState("route id space exhausted".into()))
    }

    /// Next endpoint key for a route: last key + 1, or 1 when empty.
    pub fn generate_endpoint_key(route: &Route) -> u32 {
        route.endpoints.last().map_or(1, |ep| ep.key + 1)
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Insert or replace an MSU by id, keeping the owning type's
    /// instance list in sync.
    pub fn insert_msu(&mut self, msu: Msu) -> DfgResult<()> {
        let id = msu.id;
        let type_id = msu.type_id;
        let ty = self.msu_type_mut(type_id)?;
        if !ty.instances.contains(&id) {
            ty.instances.push(id);
        }
        self.msus.insert(id, msu);
        debug!(msu_id = id, type_id, "msu inserted");
        Ok(())
    }

    /// Remove an MSU, detaching it from its thread and its type's
    /// instance list. Endpoints referencing it must be removed first.
    pub fn remove_msu(&mut self, id: MsuId) -> DfgResult<Msu> {
        let msu = self.msu(id)?.clone();

        if let Some(p) = msu.scheduling.placement {
            let rt = self.runtime_mut(p.runtime_id)?;
            if let Some(thread) = rt.thread_mut(p.thread_id) {
                thread.msus.retain(|m| *m != id);
            }
        }

        let ty = self.msu_type_mut(msu.type_id)?;
        ty.instances.retain(|m| *m != id);

        self.msus.remove(&id);
        debug!(msu_id = id, "msu removed");
        Ok(msu)
    }

    /// Create a worker thread on a runtime. Duplicate ids are rejected.
    pub fn create_thread(
        &mut self,
        runtime_id: RuntimeId,
        thread_id: ThreadId,
        mode: ThreadMode,
    ) -> DfgResult<()> {
        let rt = self.runtime_mut(runtime_id)?;
        if rt.thread(thread_id).is_some() {
            return Err(DfgError::AlreadyExists("thread", thread_id));
        }
        rt.threads.push(WorkerThread {
            id: thread_id,
            mode,
            msus: Vec::new(),
        });
        debug!(runtime_id, thread_id, ?mode, "worker thread created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_dfg() -> Dfg {
        let mut dfg = Dfg::new("test-app", 8800);
        dfg.msu_types.insert(
            1,
            MsuType {
                id: 1,
                name: "reader".to_string(),
                meta_routing: MetaRouting::default(),
                dependencies: Vec::new(),
                cloneable: true,
                colocation_group: 0,
                fixed_key_ranges: false,
                instances: Vec::new(),
            },
        );
        let mut rt = RuntimeNode::new(1, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000, 4);
        rt.threads.push(WorkerThread {
            id: 1,
            mode: ThreadMode::Pinned,
            msus: Vec::new(),
        });
        dfg.runtimes.insert(1, rt);
        dfg
    }

    fn test_msu(id: MsuId) -> Msu {
        Msu::new(id, 1, VertexKind::default(), BlockingMode::Blocking, "")
    }

    #[test]
    fn lookups_report_not_found() {
        let dfg = test_dfg();
        assert!(matches!(dfg.msu(99), Err(DfgError::NotFound("msu", 99))));
        assert!(matches!(dfg.route(99), Err(DfgError::NotFound(_, _))));
        assert!(matches!(dfg.runtime(99), Err(DfgError::NotFound(_, _))));
        assert!(matches!(dfg.msu_type(99), Err(DfgError::NotFound(_, _))));
    }

    #[test]
    fn insert_msu_updates_type_instances() {
        let mut dfg = test_dfg();
        dfg.insert_msu(test_msu(5)).unwrap();

        assert_eq!(dfg.msu(5).unwrap().id, 5);
        assert_eq!(dfg.msu_type(1).unwrap().instances, vec![5]);

        // Replacing does not duplicate the instance entry.
        dfg.insert_msu(test_msu(5)).unwrap();
        assert_eq!(dfg.msu_type(1).unwrap().instances, vec![5]);
    }

    #[test]
    fn remove_msu_detaches_everywhere() {
        let mut dfg = test_dfg();
        let mut msu = test_msu(5);
        msu.scheduling.placement = Some(Placement {
            runtime_id: 1,
            thread_id: 1,
        });
        dfg.insert_msu(msu).unwrap();
        dfg.runtime_mut(1)
            .unwrap()
            .thread_mut(1)
            .unwrap()
            .msus
            .push(5);

        dfg.remove_msu(5).unwrap();

        assert!(dfg.msu(5).is_err());
        assert!(dfg.msu_type(1).unwrap().instances.is_empty());
        assert!(dfg.runtime(1).unwrap().thread(1).unwrap().msus.is_empty());
    }

    #[test]
    fn msu_ids_are_max_plus_one() {
        let mut dfg = test_dfg();
        assert_eq!(dfg.generate_msu_id(), 1);

        dfg.insert_msu(test_msu(7)).unwrap();
        assert_eq!(dfg.generate_msu_id(), 8);

        dfg.insert_msu(test_msu(3)).unwrap();
        assert_eq!(dfg.generate_msu_id(), 8);
    }

    #[test]
    fn unused_id_is_not_consumed() {
        let mut dfg = test_dfg();
        dfg.insert_msu(test_msu(2)).unwrap();

        // Generating without inserting does not burn the id.
        assert_eq!(dfg.generate_msu_id(), 3);
        assert_eq!(dfg.generate_msu_id(), 3);
    }

    #[test]
    fn route_ids_fill_gaps() {
        let mut dfg = test_dfg();
        assert_eq!(dfg.generate_route_id().unwrap(), 1);

        let rt = dfg.runtime_mut(1).unwrap();
        rt.routes.insert(
            1,
            Route {
                id: 1,
                msu_type_id: 1,
                runtime_id: 1,
                endpoints: Vec::new(),
            },
        );
        rt.routes.insert(
            3,
            Route {
                id: 3,
                msu_type_id: 1,
                runtime_id: 1,
                endpoints: Vec::new(),
            },
        );
        assert_eq!(dfg.generate_route_id().unwrap(), 2);
    }

    #[test]
    fn endpoint_keys_continue_from_last() {
        let mut route = Route {
            id: 1,
            msu_type_id: 1,
            runtime_id: 1,
            endpoints: Vec::new(),
        };
        assert_eq!(Dfg::generate_endpoint_key(&route), 1);

        route.endpoints.push(Endpoint { msu_id: 5, key: 4 });
        assert_eq!(Dfg::generate_endpoint_key(&route), 5);
    }

    #[test]
    fn instance_on_runtime_respects_placement() {
        let mut dfg = test_dfg();
        let mut msu = test_msu(5);
        msu.scheduling.placement = Some(Placement {
            runtime_id: 1,
            thread_id: 1,
        });
        dfg.insert_msu(msu).unwrap();
        dfg.insert_msu(test_msu(6)).unwrap(); // unplaced

        assert_eq!(dfg.instance_of_type_on_runtime(1, 1), Some(5));
        assert_eq!(dfg.instances_of_type_on_runtime(1, 1), 1);
        assert_eq!(dfg.instance_of_type_on_runtime(2, 1), None);
    }

    #[test]
    fn duplicate_thread_rejected() {
        let mut dfg = test_dfg();
        assert!(matches!(
            dfg.create_thread(1, 1, ThreadMode::Pinned),
            Err(DfgError::AlreadyExists("thread", 1))
        ));
        dfg.create_thread(1, 2, ThreadMode::Unpinned).unwrap();
        assert_eq!(dfg.runtime(1).unwrap().threads.len(), 2);
    }
}
