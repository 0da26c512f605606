//! Angle sets and their scheduling.
//!
//! An angle set is one sweep task: a group of directions/groups sharing a
//! sweep ordering, advanced cooperatively through a polling state machine.
//! The [`AngleSet`] trait is the capability interface the scheduler
//! drives; the AAH and CBC models are its two variants. New strategies
//! are added as new implementations, not interface edits.

pub mod aah_angle_set;
pub mod aah_comm;
pub mod boundary;
pub mod cbc_angle_set;
pub mod kernel;
pub mod scheduler;

pub use aah_angle_set::AahAngleSet;
pub use aah_comm::{AahAsyncComm, MessageDescriptor};
pub use boundary::{
    BoundaryMap, IsotropicBoundary, ReflectingBoundary, SweepBoundary, VacuumBoundary,
};
pub use cbc_angle_set::CbcAngleSet;
pub use kernel::{CellSweepContext, SweepKernel};
pub use scheduler::{SchedulerOptions, SchedulingAlgorithm, SweepScheduler};

use crate::error::SweepError;
use serde::{Deserialize, Serialize};

/// Where an angle set stands after one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngleSetStatus {
    /// Upwind data (or boundary readiness, or send drainage) outstanding.
    Receiving,
    /// All inputs present; would execute if granted permission.
    ReadyToExecute,
    /// Executed and every send confirmed transmitted.
    Finished,
}

/// Whether an `advance` call may execute the sweep or only report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPermission {
    Execute,
    NoExecIfReady,
}

/// One schedulable sweep task.
pub trait AngleSet {
    fn id(&self) -> usize;
    /// Global angle indices this set sweeps.
    fn angles(&self) -> &[usize];
    fn num_groups(&self) -> usize;
    /// Representative direction (for scheduling locality only).
    fn direction(&self) -> [f64; 3];
    /// Task-graph depth of this partition for this set's direction.
    fn depth(&self) -> u32;

    /// Poll/advance the state machine. Never blocks: suspension is the
    /// `Receiving` return.
    fn advance(
        &mut self,
        kernel: &mut dyn kernel::SweepKernel,
        boundaries: &mut boundary::BoundaryMap,
        permission: ExecutionPermission,
    ) -> Result<AngleSetStatus, SweepError>;

    /// Try to complete outstanding sends; true once none remain.
    fn flush_send_buffers(&mut self) -> bool;

    /// Try to receive outstanding delayed (cyclic) data; true once none
    /// remain pending.
    fn receive_delayed_data(&mut self) -> Result<bool, SweepError>;

    /// Reset communicator and buffer state for the next outer iteration;
    /// promotes delayed new buffers to old.
    fn reset_sweep(&mut self);

    /// Largest chunk count this set would use for any single peer.
    fn max_message_count(&self) -> usize;

    /// Install the negotiated cross-angle-set chunk ceiling (tag spacing).
    fn set_max_message_count(&mut self, count: usize);
}
