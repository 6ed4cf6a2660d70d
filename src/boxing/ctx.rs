//! Shared, caller-owned state threaded through every builder call.

use super::task::{CopyHdDirection, TaskGraph, TaskId, TaskKind};
use crate::parallel::{LogicalBlobId, MemZone, ParallelDesc, Shape, TensorSliceView};
use std::collections::HashMap;

/// Producer, destination machine, destination zone and the cadence in force.
type ProxyKey = (TaskId, usize, MemZone, Option<Shape>);

/// Owns the task graph boxing writes into and caches proxies so that a
/// producer is copied to a given location at most once per cadence.
#[derive(Debug, Default)]
pub struct SubTaskGraphBuilderCtx {
    task_graph: TaskGraph,
    proxies: HashMap<ProxyKey, TaskId>,
    time_shape: Option<Shape>,
}

impl SubTaskGraphBuilderCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_graph(&self) -> &TaskGraph {
        &self.task_graph
    }

    /// Register one compute task per device of `parallel_desc`, in
    /// parallel-id order.
    pub fn add_compute_tasks(
        &mut self,
        op_name: &str,
        parallel_desc: &ParallelDesc,
        lbi: &LogicalBlobId,
        time_shape: &Shape,
    ) -> Vec<TaskId> {
        (0..parallel_desc.parallel_num())
            .map(|parallel_id| {
                let (machine_id, _) = parallel_desc.machine_and_device(parallel_id);
                self.task_graph.add_node(
                    TaskKind::Compute { op_name: op_name.to_string() },
                    machine_id,
                    parallel_desc.mem_zone(parallel_id),
                    lbi.clone(),
                    time_shape.clone(),
                )
            })
            .collect()
    }

    /// Run `f` with every task it creates stamped with `time_shape`.
    ///
    /// The previous cadence is restored afterwards, so scopes nest.
    pub fn with_time_shape<R>(&mut self, time_shape: &Shape, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.time_shape.replace(time_shape.clone());
        let result = f(self);
        self.time_shape = previous;
        result
    }

    /// New task carrying `like`'s tensor identity. Its time shape is the one
    /// set by [`Self::with_time_shape`], or `like`'s outside such a scope.
    pub fn new_task_like(
        &mut self,
        like: TaskId,
        kind: TaskKind,
        machine_id: usize,
        mem_zone: MemZone,
    ) -> TaskId {
        let template = self.task_graph.node(like);
        let lbi = template.lbi.clone();
        let time_shape = match &self.time_shape {
            Some(time_shape) => time_shape.clone(),
            None => template.time_shape.clone(),
        };
        self.task_graph.add_node(kind, machine_id, mem_zone, lbi, time_shape)
    }

    pub fn connect(&mut self, src: TaskId, dst: TaskId) {
        self.task_graph.connect(src, dst);
    }

    /// Feed `src`, which holds `view` of the logical tensor, into a
    /// slice-boxing task.
    pub fn add_slice_input(&mut self, node: TaskId, src: TaskId, view: TensorSliceView) {
        if let TaskKind::SliceBoxing { in_views, .. } = &mut self.task_graph.node_mut(node).kind {
            in_views.push((src, view));
        }
        self.task_graph.connect(src, node);
    }

    /// A task holding `src`'s output at `(dst_machine, dst_zone)`.
    ///
    /// Device memory only talks to host memory on the same machine, and
    /// machines only talk host to host, so a cross-machine device-to-device
    /// move becomes D2H, CommNet, H2D.
    pub fn get_proxy_node(&mut self, src: TaskId, dst_machine: usize, dst_zone: MemZone) -> TaskId {
        let (src_machine, src_zone) = {
            let node = self.task_graph.node(src);
            (node.machine_id, node.mem_zone)
        };
        if src_machine == dst_machine && src_zone == dst_zone {
            return src;
        }
        let cadence = self.time_shape.clone();
        let key = (src, dst_machine, dst_zone, cadence.clone());
        if let Some(&proxy) = self.proxies.get(&key) {
            return proxy;
        }

        let proxy = if !src_zone.is_host() {
            let host_key = (src, src_machine, MemZone::Host, cadence);
            let host = match self.proxies.get(&host_key) {
                Some(&host) => host,
                None => {
                    let host = self.new_task_like(
                        src,
                        TaskKind::CopyHd(CopyHdDirection::D2H),
                        src_machine,
                        MemZone::Host,
                    );
                    self.task_graph.connect(src, host);
                    self.proxies.insert(host_key, host);
                    host
                }
            };
            self.get_proxy_node(host, dst_machine, dst_zone)
        } else if src_machine != dst_machine {
            let net = self.new_task_like(src, TaskKind::CopyCommNet, dst_machine, MemZone::Host);
            self.task_graph.connect(src, net);
            self.proxies.insert((src, dst_machine, MemZone::Host, cadence), net);
            self.get_proxy_node(net, dst_machine, dst_zone)
        } else {
            let h2d = self.new_task_like(src, TaskKind::CopyHd(CopyHdDirection::H2D), dst_machine, dst_zone);
            self.task_graph.connect(src, h2d);
            h2d
        };
        self.proxies.insert(key, proxy);
        proxy
    }
}

/// Producer rank best placed to serve consumer rank `out_parallel_id`:
/// same machine and memory zone, else same machine, else rank 0.
pub fn find_nearest_src_parallel_id(
    in_parallel_desc: &ParallelDesc,
    out_parallel_desc: &ParallelDesc,
    out_parallel_id: usize,
) -> usize {
    let (out_machine, _) = out_parallel_desc.machine_and_device(out_parallel_id);
    let out_zone = out_parallel_desc.mem_zone(out_parallel_id);
    let in_num = in_parallel_desc.parallel_num();

    (0..in_num)
        .find(|&i| {
            in_parallel_desc.machine_and_device(i).0 == out_machine
                && in_parallel_desc.mem_zone(i) == out_zone
        })
        .or_else(|| (0..in_num).find(|&i| in_parallel_desc.machine_and_device(i).0 == out_machine))
        .unwrap_or(0)
}
