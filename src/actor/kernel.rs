//! Kernels and the engine-wide registry that shares them between actors.

use super::regst::Blob;
use crate::utils::error::{HierflowError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a kernel's operand name to the blob backing it for this call.
pub trait BnInOpResolver {
    fn blob(&self, bn_in_op: &str) -> Result<Arc<Blob>>;
}

/// A compute unit. One instance per op is shared by every actor running it,
/// so implementations keep no per-call state.
pub trait Kernel: Send + Sync {
    fn op_name(&self) -> &str;

    /// Logical blob name that operand `bn_in_op` refers to.
    fn lbn_for_bn_in_op(&self, bn_in_op: &str) -> Result<String>;

    fn forward(&self, blobs: &dyn BnInOpResolver) -> Result<()>;

    fn backward(&self, _blobs: &dyn BnInOpResolver) -> Result<()> {
        Err(HierflowError::NotImplemented(format!(
            "backward for op '{}'",
            self.op_name()
        )))
    }
}

#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kernel` under its op name, replacing any previous one.
    pub fn register(&mut self, kernel: Arc<dyn Kernel>) {
        self.kernels.insert(kernel.op_name().to_string(), kernel);
    }

    pub fn get(&self, op_name: &str) -> Result<Arc<dyn Kernel>> {
        self.kernels
            .get(op_name)
            .cloned()
            .ok_or_else(|| HierflowError::KernelNotFound(op_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Operand-to-blob-name table most kernels need.
#[derive(Debug, Clone, Default)]
pub struct BnInOpLbns {
    op_name: String,
    lbns: HashMap<String, String>,
}

impl BnInOpLbns {
    pub fn new(op_name: &str, pairs: &[(&str, &str)]) -> Self {
        Self {
            op_name: op_name.to_string(),
            lbns: pairs.iter().map(|(bn, lbn)| (bn.to_string(), lbn.to_string())).collect(),
        }
    }

    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    pub fn get(&self, bn_in_op: &str) -> Result<String> {
        self.lbns
            .get(bn_in_op)
            .cloned()
            .ok_or_else(|| HierflowError::MissingBnInOp {
                op_name: self.op_name.clone(),
                bn_in_op: bn_in_op.to_string(),
            })
    }
}

/// `out = a + b`; backward hands `out_diff` to both `a_diff` and `b_diff`.
pub struct AddKernel {
    lbns: BnInOpLbns,
}

impl AddKernel {
    pub fn new(lbns: BnInOpLbns) -> Self {
        Self { lbns }
    }
}

impl Kernel for AddKernel {
    fn op_name(&self) -> &str {
        self.lbns.op_name()
    }

    fn lbn_for_bn_in_op(&self, bn_in_op: &str) -> Result<String> {
        self.lbns.get(bn_in_op)
    }

    fn forward(&self, blobs: &dyn BnInOpResolver) -> Result<()> {
        let a = blobs.blob("a")?.read()?;
        let b = blobs.blob("b")?.read()?;
        blobs.blob("out")?.write(a.broadcast_add(&b)?)
    }

    fn backward(&self, blobs: &dyn BnInOpResolver) -> Result<()> {
        let out_diff = blobs.blob("out_diff")?.read()?;
        blobs.blob("a_diff")?.write(out_diff.clone())?;
        blobs.blob("b_diff")?.write(out_diff)
    }
}

/// `out = in * scale`; backward scales `out_diff` into `in_diff`.
pub struct ScaleKernel {
    lbns: BnInOpLbns,
    scale: f64,
}

impl ScaleKernel {
    pub fn new(lbns: BnInOpLbns, scale: f64) -> Self {
        Self { lbns, scale }
    }
}

impl Kernel for ScaleKernel {
    fn op_name(&self) -> &str {
        self.lbns.op_name()
    }

    fn lbn_for_bn_in_op(&self, bn_in_op: &str) -> Result<String> {
        self.lbns.get(bn_in_op)
    }

    fn forward(&self, blobs: &dyn BnInOpResolver) -> Result<()> {
        let input = blobs.blob("in")?.read()?;
        blobs.blob("out")?.write(input.affine(self.scale, 0.0)?)
    }

    fn backward(&self, blobs: &dyn BnInOpResolver) -> Result<()> {
        let out_diff = blobs.blob("out_diff")?.read()?;
        blobs.blob("in_diff")?.write(out_diff.affine(self.scale, 0.0)?)
    }
}
