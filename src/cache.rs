//! Explicit build-once caches for per-direction-family structures.
//!
//! Sweep structures and flux addressing are built once per
//! direction-family and reused across every group-set scheduled on it.
//! The cache is an ordinary value owned by the enclosing session/solver
//! context and passed by reference — deliberately not a process-wide
//! mutable singleton.

use crate::error::SweepError;
use crate::fluds::FludsCommonData;
use crate::spds::AahSweepStructure;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct StructureCache {
    structures: HashMap<usize, Arc<AahSweepStructure>>,
    common_data: HashMap<usize, Arc<FludsCommonData>>,
}

impl StructureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sweep structure for `family`, building it on first request.
    pub fn structure_for(
        &mut self,
        family: usize,
        build: impl FnOnce() -> Result<AahSweepStructure, SweepError>,
    ) -> Result<Arc<AahSweepStructure>, SweepError> {
        if let Some(s) = self.structures.get(&family) {
            return Ok(Arc::clone(s));
        }
        let built = Arc::new(build()?);
        self.structures.insert(family, Arc::clone(&built));
        Ok(built)
    }

    /// The flux addressing for `family`, building it on first request.
    pub fn common_data_for(
        &mut self,
        family: usize,
        build: impl FnOnce() -> Result<FludsCommonData, SweepError>,
    ) -> Result<Arc<FludsCommonData>, SweepError> {
        if let Some(cd) = self.common_data.get(&family) {
            return Ok(Arc::clone(cd));
        }
        let built = Arc::new(build()?);
        self.common_data.insert(family, Arc::clone(&built));
        Ok(built)
    }

    /// Drop every cached structure (e.g. after remeshing).
    pub fn clear(&mut self) {
        self.structures.clear();
        self.common_data.clear();
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::slab::slab_grid;

    #[test]
    fn second_request_hits_the_cache() {
        let grid = slab_grid(4, 1, 0);
        let mut cache = StructureCache::new();
        let mut builds = 0;
        for _ in 0..2 {
            let s = cache
                .structure_for(7, || {
                    builds += 1;
                    AahSweepStructure::build([1.0, 0.0, 0.0], &grid, false, &NoComm)
                })
                .unwrap();
            assert_eq!(s.depth(), 0);
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn build_errors_are_not_cached() {
        let mut cache = StructureCache::new();
        let err = cache.structure_for(1, || Err(SweepError::CyclicTaskGraph));
        assert!(err.is_err());
        assert!(cache.is_empty());
    }
}
