//! Registers: externally owned stores of named tensors that kernels read
//! and write.

use crate::utils::error::{HierflowError, Result};
use candle_core::Tensor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One named tensor slot inside a register.
#[derive(Debug)]
pub struct Blob {
    lbn: String,
    tensor: RwLock<Tensor>,
}

impl Blob {
    pub fn new(lbn: &str, tensor: Tensor) -> Self {
        Self {
            lbn: lbn.to_string(),
            tensor: RwLock::new(tensor),
        }
    }

    /// Logical blob name, `op/blob`.
    pub fn lbn(&self) -> &str {
        &self.lbn
    }

    pub fn read(&self) -> Result<Tensor> {
        let tensor = self
            .tensor
            .read()
            .map_err(|_| HierflowError::Poisoned(format!("blob {}", self.lbn)))?;
        Ok(tensor.clone())
    }

    pub fn write(&self, value: Tensor) -> Result<()> {
        let mut tensor = self
            .tensor
            .write()
            .map_err(|_| HierflowError::Poisoned(format!("blob {}", self.lbn)))?;
        *tensor = value;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Regst {
    regst_desc_id: i64,
    blobs: HashMap<String, Arc<Blob>>,
}

impl Regst {
    pub fn new(regst_desc_id: i64) -> Self {
        Self {
            regst_desc_id,
            blobs: HashMap::new(),
        }
    }

    pub fn with_blob(mut self, blob: Blob) -> Self {
        self.insert(blob);
        self
    }

    pub fn insert(&mut self, blob: Blob) {
        self.blobs.insert(blob.lbn.clone(), Arc::new(blob));
    }

    pub fn regst_desc_id(&self) -> i64 {
        self.regst_desc_id
    }

    pub fn blob_by_lbn(&self, lbn: &str) -> Result<Arc<Blob>> {
        self.blobs
            .get(lbn)
            .cloned()
            .ok_or_else(|| HierflowError::BlobNotFound {
                regst_desc_id: self.regst_desc_id,
                lbn: lbn.to_string(),
            })
    }
}

/// Caller-supplied lookup from register id to a live register.
pub trait RegstResolver {
    fn resolve(&self, regst_desc_id: i64) -> Result<Arc<Regst>>;
}

impl<F> RegstResolver for F
where
    F: Fn(i64) -> Result<Arc<Regst>>,
{
    fn resolve(&self, regst_desc_id: i64) -> Result<Arc<Regst>> {
        self(regst_desc_id)
    }
}

/// Registers keyed by id.
#[derive(Debug, Default)]
pub struct RegstTable {
    regsts: HashMap<i64, Arc<Regst>>,
}

impl RegstTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, regst: Regst) -> Arc<Regst> {
        let regst = Arc::new(regst);
        self.regsts.insert(regst.regst_desc_id, regst.clone());
        regst
    }
}

impl RegstResolver for RegstTable {
    fn resolve(&self, regst_desc_id: i64) -> Result<Arc<Regst>> {
        self.regsts
            .get(&regst_desc_id)
            .cloned()
            .ok_or(HierflowError::RegstNotFound(regst_desc_id))
    }
}
