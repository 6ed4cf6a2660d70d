use candle_core::{DType, Device, Tensor};
use hierflow::actor::{
    Actor, Blob, BnInOpLbns, BnInOpResolver, Kernel, KernelRegistry, Regst, RegstResolver, RegstTable, TaskProto,
};
use hierflow::utils::error::{HierflowError, Result};
use std::sync::{Arc, Mutex};

/// Appends its op name to a shared log, then writes `in + 1` to `out`.
struct RecordingKernel {
    lbns: BnInOpLbns,
    log: Arc<Mutex<Vec<String>>>,
}

impl Kernel for RecordingKernel {
    fn op_name(&self) -> &str {
        self.lbns.op_name()
    }

    fn lbn_for_bn_in_op(&self, bn_in_op: &str) -> Result<String> {
        self.lbns.get(bn_in_op)
    }

    fn forward(&self, blobs: &dyn BnInOpResolver) -> Result<()> {
        self.log.lock().unwrap().push(self.op_name().to_string());
        let input = blobs.blob("in")?.read()?;
        blobs.blob("out")?.write(input.affine(1.0, 1.0)?)
    }
}

fn registry(log: &Arc<Mutex<Vec<String>>>) -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    for (op_name, input, output) in [("a", "x/out", "a/out"), ("b", "a/out", "b/out")] {
        registry.register(Arc::new(RecordingKernel {
            lbns: BnInOpLbns::new(op_name, &[("in", input), ("out", output)]),
            log: log.clone(),
        }));
    }
    registry
}

fn regsts() -> Result<RegstTable> {
    let device = Device::Cpu;
    let mut table = RegstTable::new();
    table.insert(Regst::new(1).with_blob(Blob::new("x/out", Tensor::new(&[1f32, 2.], &device)?)));
    table.insert(Regst::new(2).with_blob(Blob::new("a/out", Tensor::zeros(2, DType::F32, &device)?)));
    table.insert(Regst::new(3).with_blob(Blob::new("b/out", Tensor::zeros(2, DType::F32, &device)?)));
    Ok(table)
}

const TWO_STEP_TASK: &str = r#"{
    "task_id": 42,
    "is_forward": true,
    "exec_sequence": [
        {"op_name": "a", "bn_in_op2regst_desc_id": {"in": 1, "out": 2}},
        {"op_name": "b", "bn_in_op2regst_desc_id": {"in": 2, "out": 3}}
    ]
}"#;

#[test]
fn test_kernels_run_in_order() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let actor = Actor::new(&TaskProto::from_json(TWO_STEP_TASK)?, &registry(&log))?;
    let table = regsts()?;

    actor.execute(&table)?;

    assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    // b saw a's output: (x + 1) + 1.
    let out = table.resolve(3)?.blob_by_lbn("b/out")?.read()?;
    assert_eq!(out.to_vec1::<f32>()?, vec![3., 4.]);
    Ok(())
}

#[test]
fn test_repeated_execution_reuses_bindings() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let actor = Actor::new(&TaskProto::from_json(TWO_STEP_TASK)?, &registry(&log))?;
    let table = regsts()?;

    actor.execute(&table)?;
    actor.execute(&table)?;

    assert_eq!(log.lock().unwrap().len(), 4);
    assert_eq!(actor.exec_kernels().len(), 2);
    Ok(())
}

#[test]
fn test_resolution_failure_stops_execution() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let actor = Actor::new(&TaskProto::from_json(TWO_STEP_TASK)?, &registry(&log))?;
    let table = regsts()?;

    // Register 2 is gone: kernel a cannot write its output.
    let resolver = |id: i64| {
        if id == 2 {
            Err(HierflowError::RegstNotFound(id))
        } else {
            table.resolve(id)
        }
    };
    let err = actor.execute(&resolver).unwrap_err();

    assert!(matches!(err, HierflowError::RegstNotFound(2)));
    assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
    Ok(())
}

#[test]
fn test_backward_without_implementation() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut task = TaskProto::from_json(TWO_STEP_TASK)?;
    task.is_forward = false;
    let actor = Actor::new(&task, &registry(&log))?;

    let err = actor.execute(&regsts()?).unwrap_err();
    assert!(matches!(err, HierflowError::NotImplemented(_)));
    assert!(log.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_unknown_op_fails_construction() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let task = TaskProto::from_json(r#"{"task_id": 1, "exec_sequence": [{"op_name": "c"}]}"#)?;

    let result = Actor::new(&task, &registry(&log));
    assert!(matches!(result, Err(HierflowError::KernelNotFound(name)) if name == "c"));
    Ok(())
}
