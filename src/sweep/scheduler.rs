//! Drives many angle sets to completion, overlapping computation with
//! communication.
//!
//! FIFO grants execution in registration order; depth-of-graph polls
//! availability first and prefers shallow task-graph depths (then
//! direction octant, for locality only — correctness never depends on the
//! policy). After all sets finish, pending sends are drained, delayed
//! data is received to completion, and every angle set and reflecting
//! boundary is reset for the next outer iteration.

use super::boundary::BoundaryMap;
use super::kernel::SweepKernel;
use super::{AngleSet, AngleSetStatus, ExecutionPermission};
use crate::comm::Communicator;
use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::error::SweepError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingAlgorithm {
    FirstInFirstOut,
    DepthOfGraph,
}

/// Scheduler configuration. `eager_limit` is the message-size threshold
/// (bytes) above which a peer stream is chunked; callers feed it to the
/// angle sets they construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    pub algorithm: SchedulingAlgorithm,
    pub eager_limit: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            algorithm: SchedulingAlgorithm::FirstInFirstOut,
            eager_limit: 32_000,
        }
    }
}

pub struct SweepScheduler {
    angle_sets: Vec<Box<dyn AngleSet>>,
    algorithm: SchedulingAlgorithm,
    /// Depth-of-graph polling order.
    order: Vec<usize>,
}

impl SweepScheduler {
    /// Register the angle sets and negotiate the shared chunk ceiling:
    /// the maximum chunk count over every angle set on every rank, so
    /// chunk tags can never collide across sets.
    pub fn new<C: Communicator>(
        mut angle_sets: Vec<Box<dyn AngleSet>>,
        options: SchedulerOptions,
        comm: &C,
    ) -> Self {
        let local_max = angle_sets
            .iter()
            .map(|a| a.max_message_count())
            .max()
            .unwrap_or(1) as u32;
        let mut gathered = vec![0u32; comm.size()];
        comm.allgather(
            cast_slice(std::slice::from_ref(&local_max)),
            cast_slice_mut(&mut gathered),
        );
        let negotiated = gathered.iter().copied().max().unwrap_or(1) as usize;
        for set in angle_sets.iter_mut() {
            set.set_max_message_count(negotiated);
        }
        log::debug!(
            "scheduler: {} angle set(s), chunk ceiling {negotiated}",
            angle_sets.len()
        );

        let mut order: Vec<usize> = (0..angle_sets.len()).collect();
        order.sort_by_key(|&i| {
            let set = &angle_sets[i];
            let d = set.direction();
            (set.depth(), d[0] < 0.0, d[1] < 0.0, d[2] < 0.0)
        });

        Self {
            angle_sets,
            algorithm: options.algorithm,
            order,
        }
    }

    pub fn num_angle_sets(&self) -> usize {
        self.angle_sets.len()
    }

    /// Run one full sweep iteration: every angle set to `Finished`, sends
    /// drained, delayed data received, state reset.
    pub fn sweep(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
    ) -> Result<(), SweepError> {
        match self.algorithm {
            SchedulingAlgorithm::FirstInFirstOut => self.sweep_fifo(kernel, boundaries)?,
            SchedulingAlgorithm::DepthOfGraph => self.sweep_dog(kernel, boundaries)?,
        }

        // Drain pending sends.
        loop {
            let all = self
                .angle_sets
                .iter_mut()
                .fold(true, |acc, s| s.flush_send_buffers() && acc);
            if all {
                break;
            }
            std::thread::yield_now();
        }

        // Delayed receives until none pending.
        loop {
            let mut all = true;
            for set in self.angle_sets.iter_mut() {
                all &= set.receive_delayed_data()?;
            }
            if all {
                break;
            }
            std::thread::yield_now();
        }

        // Fresh state for the next outer iteration.
        for set in self.angle_sets.iter_mut() {
            set.reset_sweep();
        }
        for boundary in boundaries.values_mut() {
            boundary.reset();
        }
        Ok(())
    }

    fn sweep_fifo(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
    ) -> Result<(), SweepError> {
        let mut finished = vec![false; self.angle_sets.len()];
        while finished.iter().any(|f| !f) {
            for (i, set) in self.angle_sets.iter_mut().enumerate() {
                if finished[i] {
                    continue;
                }
                if set.advance(kernel, boundaries, ExecutionPermission::Execute)?
                    == AngleSetStatus::Finished
                {
                    finished[i] = true;
                }
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn sweep_dog(
        &mut self,
        kernel: &mut dyn SweepKernel,
        boundaries: &mut BoundaryMap,
    ) -> Result<(), SweepError> {
        let mut finished = vec![false; self.angle_sets.len()];
        while finished.iter().any(|f| !f) {
            for &i in &self.order {
                if finished[i] {
                    continue;
                }
                match self.angle_sets[i].advance(
                    kernel,
                    boundaries,
                    ExecutionPermission::NoExecIfReady,
                )? {
                    AngleSetStatus::Finished => finished[i] = true,
                    AngleSetStatus::ReadyToExecute => {
                        if self.angle_sets[i].advance(
                            kernel,
                            boundaries,
                            ExecutionPermission::Execute,
                        )? == AngleSetStatus::Finished
                        {
                            finished[i] = true;
                        }
                    }
                    AngleSetStatus::Receiving => {}
                }
            }
            std::thread::yield_now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_json_roundtrip() {
        let opts = SchedulerOptions {
            algorithm: SchedulingAlgorithm::DepthOfGraph,
            eager_limit: 4096,
        };
        let s = serde_json::to_string(&opts).unwrap();
        let back: SchedulerOptions = serde_json::from_str(&s).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn default_options_use_fifo() {
        let opts = SchedulerOptions::default();
        assert_eq!(opts.algorithm, SchedulingAlgorithm::FirstInFirstOut);
        assert!(opts.eager_limit > 0);
    }
}
