use candle_core::{DType, Device, Tensor};
use hierflow::actor::{
    Actor, AddKernel, Blob, BnInOpLbns, ExecNodeProto, KernelRegistry, Regst, RegstResolver, RegstTable,
    ScaleKernel, TaskProto,
};
use hierflow::boxing::{BoxingRequest, HierarchicalSubTaskGraphBuilder, SubTaskGraphBuilderCtx};
use hierflow::parallel::{
    BlobDesc, LogicalBlobId, ParallelConf, ParallelDesc, ParallelDistribution, SbpParallel, Shape,
};
use hierflow::utils::config::HierflowConfig;
use hierflow::utils::error::Result;
use hierflow::utils::{logging, metrics};
use std::sync::Arc;
use tracing::info;

struct Scenario {
    title: &'static str,
    in_conf: ParallelConf,
    in_sbp: Vec<SbpParallel>,
    out_conf: ParallelConf,
    out_sbp: Vec<SbpParallel>,
    shape: Vec<usize>,
}

fn run_scenario(builder: &HierarchicalSubTaskGraphBuilder, scenario: Scenario) -> Result<()> {
    println!("\n--- Boxing: {} ---", scenario.title);
    let mut ctx = SubTaskGraphBuilderCtx::new();
    let lbi = LogicalBlobId::new("producer", "out");
    let in_desc = ParallelDesc::new(&scenario.in_conf)?;
    let out_desc = ParallelDesc::new(&scenario.out_conf)?;
    let time_shape = Shape::new(vec![1]);
    let in_tasks = ctx.add_compute_tasks("producer", &in_desc, &lbi, &time_shape);
    let blob = BlobDesc::new(Shape::new(scenario.shape), DType::F32);
    let in_dist = ParallelDistribution::new(scenario.in_sbp);
    let out_dist = ParallelDistribution::new(scenario.out_sbp);

    let request = BoxingRequest {
        sorted_in_tasks: &in_tasks,
        in_parallel_desc: &in_desc,
        out_parallel_desc: &out_desc,
        lbi: &lbi,
        logical_blob_desc: &blob,
        in_distribution: &in_dist,
        out_distribution: &out_dist,
        time_shape: &time_shape,
    };
    match builder.build(&mut ctx, &request) {
        Ok(plan) => {
            println!("{}", plan.status);
            println!("New tasks: {}", plan.new_tasks.len());
            for id in &plan.new_tasks {
                let node = ctx.task_graph().node(*id);
                println!("  {} on machine {} {}: {:?}", id, node.machine_id, node.mem_zone, node.kind);
            }
        }
        Err(e) => println!("Not supported: {}", e),
    }
    Ok(())
}

fn run_actor() -> Result<()> {
    println!("\n--- Actor: add then scale ---");
    let mut registry = KernelRegistry::new();
    registry.register(Arc::new(AddKernel::new(BnInOpLbns::new(
        "add",
        &[("a", "x/out"), ("b", "y/out"), ("out", "add/out")],
    ))));
    registry.register(Arc::new(ScaleKernel::new(
        BnInOpLbns::new("scale", &[("in", "add/out"), ("out", "scale/out")]),
        0.5,
    )));

    let task = TaskProto {
        task_id: 0,
        is_forward: true,
        exec_sequence: vec![
            ExecNodeProto::new("add", &[("a", 1), ("b", 1), ("out", 2)]),
            ExecNodeProto::new("scale", &[("in", 2), ("out", 3)]),
        ],
    };
    let actor = Actor::new(&task, &registry)?;

    let device = Device::Cpu;
    let mut regsts = RegstTable::new();
    regsts.insert(
        Regst::new(1)
            .with_blob(Blob::new("x/out", Tensor::new(&[1f32, 2., 3.], &device)?))
            .with_blob(Blob::new("y/out", Tensor::new(&[3f32, 2., 1.], &device)?)),
    );
    regsts.insert(Regst::new(2).with_blob(Blob::new("add/out", Tensor::zeros(3, DType::F32, &device)?)));
    regsts.insert(Regst::new(3).with_blob(Blob::new("scale/out", Tensor::zeros(3, DType::F32, &device)?)));

    actor.execute(&regsts)?;
    let out = regsts.resolve(3)?.blob_by_lbn("scale/out")?.read()?;
    println!("scale/out = {:?}", out.to_vec1::<f32>()?);
    Ok(())
}

fn main() -> Result<()> {
    logging::init_logging_from_env();
    info!("Starting hierflow demo");

    let config = match std::env::args().nth(1) {
        Some(path) => HierflowConfig::from_file_with_env(path)?,
        None => {
            let mut config = HierflowConfig::from_env();
            config.resource.machine_num = config.resource.machine_num.max(2);
            config.resource.gpu_device_num = config.resource.gpu_device_num.max(4);
            config
        }
    };
    config.validate()?;
    let builder = HierarchicalSubTaskGraphBuilder::new(&config.resource);
    println!("Builder chain: {:?}", builder.builder_names());

    let scenarios = vec![
        Scenario {
            title: "single device, B -> B",
            in_conf: ParallelConf::new("gpu", &["0:0"]),
            in_sbp: vec![SbpParallel::Broadcast],
            out_conf: ParallelConf::new("gpu", &["0:0"]),
            out_sbp: vec![SbpParallel::Broadcast],
            shape: vec![8, 4],
        },
        Scenario {
            title: "4 GPUs, S(0) -> B",
            in_conf: ParallelConf::new("gpu", &["0:0-3"]),
            in_sbp: vec![SbpParallel::Split(0)],
            out_conf: ParallelConf::new("gpu", &["0:0-3"]),
            out_sbp: vec![SbpParallel::Broadcast],
            shape: vec![8, 4],
        },
        Scenario {
            title: "[2, 2] S(0)S(0) -> 2 machines S(1)",
            in_conf: ParallelConf::new("gpu", &["0:0-3"]).with_hierarchy(vec![2, 2]),
            in_sbp: vec![SbpParallel::Split(0), SbpParallel::Split(0)],
            out_conf: ParallelConf::new("gpu", &["0:0", "1:0"]),
            out_sbp: vec![SbpParallel::Split(1)],
            shape: vec![8, 4],
        },
        Scenario {
            title: "[2, 2] S(0)S(0) -> [2, 2] S(0)B",
            in_conf: ParallelConf::new("gpu", &["0:0-3"]).with_hierarchy(vec![2, 2]),
            in_sbp: vec![SbpParallel::Split(0), SbpParallel::Split(0)],
            out_conf: ParallelConf::new("gpu", &["0:0-3"]).with_hierarchy(vec![2, 2]),
            out_sbp: vec![SbpParallel::Split(0), SbpParallel::Broadcast],
            shape: vec![8, 4],
        },
    ];
    for scenario in scenarios {
        run_scenario(&builder, scenario)?;
    }

    run_actor()?;

    println!("\n--- Metrics ---");
    print!("{}", metrics::get_metrics().gather()?);
    Ok(())
}
