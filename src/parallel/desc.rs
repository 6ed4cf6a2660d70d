//! Placement descriptors.
//!
//! A [`ParallelDesc`] names an ordered device group (`parallel_id` indexes
//! into it) and the hierarchy those devices are arranged in. It is built from
//! a [`ParallelConf`] whose device names follow the `"<machine>:<first>-<last>"`
//! convention, e.g. `["0:0-3", "1:0-3"]` for eight GPUs on two machines.

use super::shape::Shape;
use crate::utils::error::{HierflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

impl DeviceType {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.to_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" | "cuda" => Ok(DeviceType::Gpu),
            other => Err(HierflowError::MalformedDescriptor(format!(
                "unknown device tag '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Gpu => write!(f, "gpu"),
        }
    }
}

/// Memory zone on one machine: host memory or a specific accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemZone {
    Host,
    Device(usize),
}

impl MemZone {
    pub fn is_host(&self) -> bool {
        matches!(self, MemZone::Host)
    }
}

impl fmt::Display for MemZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemZone::Host => write!(f, "host"),
            MemZone::Device(id) => write!(f, "dev{}", id),
        }
    }
}

/// Serializable placement as handed over by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConf {
    pub device_tag: String,
    pub device_name: Vec<String>,
    #[serde(default)]
    pub hierarchy: Option<Vec<usize>>,
}

impl ParallelConf {
    pub fn new(device_tag: &str, device_name: &[&str]) -> Self {
        Self {
            device_tag: device_tag.to_string(),
            device_name: device_name.iter().map(|s| s.to_string()).collect(),
            hierarchy: None,
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Vec<usize>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }
}

/// Widest `a-b` range a single device name may span.
pub const MAX_DEVICES_PER_MACHINE: usize = 1 << 16;

/// Parse `"m:d"` or `"m:a-b"` into `(machine, [devices])`.
fn parse_device_name(name: &str) -> Result<(usize, Vec<usize>)> {
    let malformed = || HierflowError::MalformedDescriptor(format!("bad device name '{}'", name));

    let (machine, devices) = name.split_once(':').ok_or_else(malformed)?;
    let machine: usize = machine.trim().parse().map_err(|_| malformed())?;
    let (first, last) = match devices.split_once('-') {
        Some((a, b)) => (a, b),
        None => (devices, devices),
    };
    let first: usize = first.trim().parse().map_err(|_| malformed())?;
    let last: usize = last.trim().parse().map_err(|_| malformed())?;
    if last < first {
        return Err(malformed());
    }
    if last - first >= MAX_DEVICES_PER_MACHINE {
        return Err(HierflowError::MalformedDescriptor(format!(
            "device name '{}' spans more than {} devices",
            name, MAX_DEVICES_PER_MACHINE
        )));
    }
    Ok((machine, (first..=last).collect()))
}

/// An immutable device group plus its hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelDesc {
    device_type: DeviceType,
    device_name: Vec<String>,
    devices: Vec<(usize, usize)>,
    hierarchy: Shape,
}

impl ParallelDesc {
    pub fn new(conf: &ParallelConf) -> Result<Self> {
        let device_type = DeviceType::from_tag(&conf.device_tag)?;

        let mut devices = Vec::new();
        let mut seen = HashSet::new();
        for name in &conf.device_name {
            let (machine_id, device_ids) = parse_device_name(name)?;
            for device_id in device_ids {
                if !seen.insert((machine_id, device_id)) {
                    return Err(HierflowError::MalformedDescriptor(format!(
                        "device {}:{} appears more than once",
                        machine_id, device_id
                    )));
                }
                devices.push((machine_id, device_id));
            }
        }
        if devices.is_empty() {
            return Err(HierflowError::MalformedDescriptor(
                "placement has no devices".to_string(),
            ));
        }

        let hierarchy = match &conf.hierarchy {
            Some(dims) => Shape::new(dims.clone()),
            None => Shape::new(vec![devices.len()]),
        };

        let desc = Self {
            device_type,
            device_name: conf.device_name.clone(),
            devices,
            hierarchy,
        };
        desc.check_hierarchy(&desc.hierarchy)?;
        Ok(desc)
    }

    fn check_hierarchy(&self, hierarchy: &Shape) -> Result<()> {
        if hierarchy.num_axes() == 0 {
            return Err(HierflowError::MalformedDescriptor(
                "hierarchy must have at least one axis".to_string(),
            ));
        }
        if hierarchy.dims().iter().any(|&d| d == 0) {
            return Err(HierflowError::MalformedDescriptor(format!(
                "hierarchy {} has a zero extent",
                hierarchy
            )));
        }
        let covered = hierarchy.checked_elem_cnt().ok_or_else(|| {
            HierflowError::MalformedDescriptor(format!("hierarchy {} overflows the device count", hierarchy))
        })?;
        if covered != self.devices.len() {
            return Err(HierflowError::MalformedDescriptor(format!(
                "hierarchy {} covers {} devices but placement has {}",
                hierarchy,
                covered,
                self.devices.len()
            )));
        }
        Ok(())
    }

    /// Same devices arranged in a different hierarchy.
    pub fn with_hierarchy(&self, hierarchy: Shape) -> Result<Self> {
        self.check_hierarchy(&hierarchy)?;
        Ok(Self { hierarchy, ..self.clone() })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn hierarchy(&self) -> &Shape {
        &self.hierarchy
    }

    pub fn parallel_num(&self) -> usize {
        self.devices.len()
    }

    /// `(machine_id, device_id)` in parallel-id order.
    pub fn devices(&self) -> &[(usize, usize)] {
        &self.devices
    }

    pub fn machine_and_device(&self, parallel_id: usize) -> (usize, usize) {
        self.devices[parallel_id]
    }

    pub fn mem_zone(&self, parallel_id: usize) -> MemZone {
        match self.device_type {
            DeviceType::Cpu => MemZone::Host,
            DeviceType::Gpu => MemZone::Device(self.devices[parallel_id].1),
        }
    }

    pub fn contains_device(&self, machine_id: usize, device_id: usize) -> bool {
        self.devices.contains(&(machine_id, device_id))
    }

    pub fn parallel_id_of(&self, machine_id: usize, device_id: usize) -> Option<usize> {
        self.devices.iter().position(|&d| d == (machine_id, device_id))
    }

    pub fn equals_ignoring_hierarchy(&self, other: &ParallelDesc) -> bool {
        self.device_type == other.device_type && self.devices == other.devices
    }
}

impl fmt::Display for ParallelDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}", self.device_type, self.device_name.join(","), self.hierarchy)
    }
}
