//! Actor: runs the kernels of one compiled node against externally owned
//! registers.
//!
//! An actor is built once from a [`TaskProto`] and is immutable afterwards.
//! The scheduler calls [`Actor::execute`] once per readiness event and never
//! overlaps two calls on the same actor; the actor itself does no locking or
//! waiting.

pub mod kernel;
pub mod regst;
pub mod task_proto;

pub use kernel::{AddKernel, BnInOpLbns, BnInOpResolver, Kernel, KernelRegistry, ScaleKernel};
pub use regst::{Blob, Regst, RegstResolver, RegstTable};
pub use task_proto::{ExecNodeProto, TaskProto};

use crate::utils::error::{HierflowError, Result};
use crate::utils::metrics;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WardMode {
    Forward,
    Backward,
}

impl fmt::Display for WardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WardMode::Forward => write!(f, "forward"),
            WardMode::Backward => write!(f, "backward"),
        }
    }
}

/// A shared kernel bound to the registers of one node.
pub struct ExecKernel {
    kernel: Arc<dyn Kernel>,
    bn_in_op2regst_desc_id: HashMap<String, i64>,
}

impl ExecKernel {
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn regst_desc_id(&self, bn_in_op: &str) -> Result<i64> {
        self.bn_in_op2regst_desc_id
            .get(bn_in_op)
            .copied()
            .ok_or_else(|| HierflowError::MissingBnInOp {
                op_name: self.kernel.op_name().to_string(),
                bn_in_op: bn_in_op.to_string(),
            })
    }
}

/// Operand name -> register id -> register -> blob name -> blob.
struct ExecKernelBlobs<'a> {
    exec_kernel: &'a ExecKernel,
    regsts: &'a dyn RegstResolver,
}

impl BnInOpResolver for ExecKernelBlobs<'_> {
    fn blob(&self, bn_in_op: &str) -> Result<Arc<Blob>> {
        let regst_desc_id = self.exec_kernel.regst_desc_id(bn_in_op)?;
        let regst = self.regsts.resolve(regst_desc_id)?;
        let lbn = self.exec_kernel.kernel.lbn_for_bn_in_op(bn_in_op)?;
        regst.blob_by_lbn(&lbn)
    }
}

pub struct Actor {
    task_id: i64,
    ward: WardMode,
    exec_kernels: Vec<ExecKernel>,
}

impl Actor {
    /// Bind every op of `task` to its kernel in `registry`.
    pub fn new(task: &TaskProto, registry: &KernelRegistry) -> Result<Self> {
        let exec_kernels = task
            .exec_sequence
            .iter()
            .map(|node| {
                Ok(ExecKernel {
                    kernel: registry.get(&node.op_name)?,
                    bn_in_op2regst_desc_id: node.bn_in_op2regst_desc_id.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let ward = if task.is_forward { WardMode::Forward } else { WardMode::Backward };

        debug!(task_id = task.task_id, ward = %ward, kernels = exec_kernels.len(), "Actor created");
        Ok(Self {
            task_id: task.task_id,
            ward,
            exec_kernels,
        })
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn ward(&self) -> WardMode {
        self.ward
    }

    pub fn exec_kernels(&self) -> &[ExecKernel] {
        &self.exec_kernels
    }

    /// Run each kernel once, in construction order. The first failure is
    /// returned as is; later kernels do not run.
    pub fn execute(&self, regsts: &dyn RegstResolver) -> Result<()> {
        metrics::get_metrics().actor_executions.inc();
        let ward = self.ward.to_string();
        for exec_kernel in &self.exec_kernels {
            let blobs = ExecKernelBlobs { exec_kernel, regsts };
            let op_name = exec_kernel.kernel.op_name();
            let start = Instant::now();
            match self.ward {
                WardMode::Forward => exec_kernel.kernel.forward(&blobs)?,
                WardMode::Backward => exec_kernel.kernel.backward(&blobs)?,
            }
            let elapsed = start.elapsed();
            metrics::record_kernel_invocation(op_name, &ward, elapsed.as_secs_f64());
            trace!(
                task_id = self.task_id,
                op_name = op_name,
                ward = %ward,
                elapsed_us = elapsed.as_micros() as u64,
                "Kernel invoked"
            );
        }
        Ok(())
    }
}
