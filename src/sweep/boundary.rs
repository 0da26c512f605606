//! Boundary contract consumed by the sweep.
//!
//! A boundary supplies incoming flux for faces without an upwind neighbor
//! and may capture outgoing flux. Reflecting boundaries additionally gate
//! angle-set readiness: the reflected direction cannot start until the
//! opposing direction's outgoing flux has been stored.

use hashbrown::HashMap;
use std::collections::{BTreeMap, HashSet};

/// Boundaries by boundary id, owned by the scheduler's caller.
pub type BoundaryMap = BTreeMap<u64, Box<dyn SweepBoundary>>;

pub trait SweepBoundary: Send {
    fn is_reflecting(&self) -> bool {
        false
    }

    /// Incoming group flux for (cell, face, dof) under global angle
    /// `angle`.
    fn incoming_psi(&self, cell_gid: u64, face_id: usize, dof: usize, angle: usize) -> &[f64];

    /// Storage for outgoing group flux; `None` when the boundary
    /// discards outflow.
    fn outgoing_psi_mut(
        &mut self,
        cell_gid: u64,
        face_id: usize,
        dof: usize,
        angle: usize,
    ) -> Option<&mut [f64]>;

    /// True when every listed angle may sweep against this boundary.
    fn angles_ready(&self, angles: &[usize]) -> bool {
        let _ = angles;
        true
    }

    /// Record that the listed angles' outgoing flux is now stored.
    fn update_angles_ready(&mut self, angles: &[usize]) {
        let _ = angles;
    }

    /// Clear readiness flags for the next outer iteration.
    fn reset(&mut self) {}
}

/// Zero incoming flux, outflow discarded.
#[derive(Debug, Clone)]
pub struct VacuumBoundary {
    zero: Vec<f64>,
}

impl VacuumBoundary {
    pub fn new(num_groups: usize) -> Self {
        Self {
            zero: vec![0.0; num_groups],
        }
    }
}

impl SweepBoundary for VacuumBoundary {
    fn incoming_psi(&self, _cell_gid: u64, _face_id: usize, _dof: usize, _angle: usize) -> &[f64] {
        &self.zero
    }

    fn outgoing_psi_mut(
        &mut self,
        _cell_gid: u64,
        _face_id: usize,
        _dof: usize,
        _angle: usize,
    ) -> Option<&mut [f64]> {
        None
    }
}

/// Constant isotropic incoming flux, outflow discarded.
#[derive(Debug, Clone)]
pub struct IsotropicBoundary {
    value: Vec<f64>,
}

impl IsotropicBoundary {
    pub fn new(group_values: Vec<f64>) -> Self {
        Self { value: group_values }
    }
}

impl SweepBoundary for IsotropicBoundary {
    fn incoming_psi(&self, _cell_gid: u64, _face_id: usize, _dof: usize, _angle: usize) -> &[f64] {
        &self.value
    }

    fn outgoing_psi_mut(
        &mut self,
        _cell_gid: u64,
        _face_id: usize,
        _dof: usize,
        _angle: usize,
    ) -> Option<&mut [f64]> {
        None
    }
}

/// Stores outgoing flux per (cell, face, dof, angle) and plays it back as
/// the incoming flux of the opposing direction. The direction pairing is
/// supplied by the quadrature owner.
pub struct ReflectingBoundary {
    num_groups: usize,
    /// Reflected partner per angle: reading angle -> angle whose outflow
    /// feeds it.
    opposing: HashMap<usize, usize>,
    store: HashMap<(u64, usize, usize, usize), Vec<f64>>,
    ready_angles: HashSet<usize>,
    zero: Vec<f64>,
}

impl ReflectingBoundary {
    /// `opposing` pairs (reading angle, angle whose outflow feeds it).
    pub fn new(num_groups: usize, opposing: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self {
            num_groups,
            opposing: opposing.into_iter().collect(),
            store: HashMap::new(),
            ready_angles: HashSet::new(),
            zero: vec![0.0; num_groups],
        }
    }
}

impl SweepBoundary for ReflectingBoundary {
    fn is_reflecting(&self) -> bool {
        true
    }

    fn incoming_psi(&self, cell_gid: u64, face_id: usize, dof: usize, angle: usize) -> &[f64] {
        let Some(&source) = self.opposing.get(&angle) else {
            return &self.zero;
        };
        self.store
            .get(&(cell_gid, face_id, dof, source))
            .map(|v| v.as_slice())
            .unwrap_or(&self.zero)
    }

    fn outgoing_psi_mut(
        &mut self,
        cell_gid: u64,
        face_id: usize,
        dof: usize,
        angle: usize,
    ) -> Option<&mut [f64]> {
        let num_groups = self.num_groups;
        Some(
            self.store
                .entry((cell_gid, face_id, dof, angle))
                .or_insert_with(|| vec![0.0; num_groups]),
        )
    }

    fn angles_ready(&self, angles: &[usize]) -> bool {
        angles.iter().all(|a| match self.opposing.get(a) {
            Some(source) => self.ready_angles.contains(source),
            None => true,
        })
    }

    fn update_angles_ready(&mut self, angles: &[usize]) {
        self.ready_angles.extend(angles.iter().copied());
    }

    fn reset(&mut self) {
        self.ready_angles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacuum_is_always_zero_and_ready() {
        let b = VacuumBoundary::new(3);
        assert_eq!(b.incoming_psi(1, 0, 0, 5), &[0.0, 0.0, 0.0]);
        assert!(b.angles_ready(&[0, 1, 2]));
        assert!(!b.is_reflecting());
    }

    #[test]
    fn reflecting_gates_on_opposing_angle() {
        // Angle 0 reflects into angle 1.
        let mut b = ReflectingBoundary::new(1, [(1, 0)]);
        assert!(b.angles_ready(&[0]), "source direction never gated");
        assert!(!b.angles_ready(&[1]), "reflected direction gated");

        b.outgoing_psi_mut(4, 1, 0, 0).unwrap()[0] = 2.5;
        b.update_angles_ready(&[0]);
        assert!(b.angles_ready(&[1]));
        assert_eq!(b.incoming_psi(4, 1, 0, 1), &[2.5]);

        b.reset();
        assert!(!b.angles_ready(&[1]));
        // Stored flux survives the readiness reset.
        assert_eq!(b.incoming_psi(4, 1, 0, 1), &[2.5]);
    }
}
