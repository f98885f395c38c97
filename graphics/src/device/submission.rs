//! Ordering of the command lists submitted in one frame.
//!
//! Every submitted list becomes a node. Edges come from two sources:
//!
//! - [`ExecutionOrder::Sequential`] chains a list after the list submitted
//!   before it on the same queue;
//! - [`CommandList::depends_on`](crate::CommandList::depends_on) declares an
//!   explicit wait on another list of the same frame, across queues.
//!
//! The graph is sorted topologically (ties keep submission order) and every
//! edge is turned into a semaphore signaled by the producer and waited on by
//! the consumer.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::backend::{GpuBackend, SemaphoreHandle};
use crate::command::{CommandList, CommandListId};
use crate::error::GraphicsError;
use crate::sync::Semaphore;
use crate::types::{ExecutionOrder, PipelineStage, QueueType};

/// A command list waiting for the end of the frame.
pub(crate) struct Submission {
    pub(crate) list: CommandList,
    pub(crate) wait_stage: PipelineStage,
    pub(crate) order: ExecutionOrder,
}

/// What the ordering needs to know about one submitted list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubmissionNode {
    pub(crate) id: CommandListId,
    pub(crate) queue: QueueType,
    pub(crate) order: ExecutionOrder,
    pub(crate) dependencies: Vec<CommandListId>,
}

impl SubmissionNode {
    pub(crate) fn of(submission: &Submission) -> Self {
        Self {
            id: submission.list.id(),
            queue: submission.list.queue(),
            order: submission.order,
            dependencies: submission.list.dependencies().to_vec(),
        }
    }
}

/// Nodes in execution order plus the edges between them.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SubmissionGraph {
    /// Node indices in the order they are submitted.
    pub(crate) order: Vec<usize>,
    /// `(producer, consumer)` pairs, each becoming one semaphore.
    pub(crate) edges: Vec<(usize, usize)>,
}

impl SubmissionGraph {
    /// Order `nodes`; `leading` nodes at the front of the slice run before
    /// every other node.
    ///
    /// Returns [`GraphicsError::DependencyCycle`] if the declared
    /// dependencies contradict each other.
    pub(crate) fn build(nodes: &[SubmissionNode], leading: usize) -> Result<Self, GraphicsError> {
        crate::profile_function!();

        let index_of: HashMap<CommandListId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id, index))
            .collect();

        let mut edges = Vec::new();

        for leader in 0..leading.min(nodes.len()) {
            for follower in leading..nodes.len() {
                add_edge(&mut edges, leader, follower);
            }
        }

        let mut last_on_queue: HashMap<QueueType, usize> = HashMap::new();
        for (index, node) in nodes.iter().enumerate().skip(leading) {
            if node.order == ExecutionOrder::Sequential
                && let Some(previous) = last_on_queue.get(&node.queue)
            {
                add_edge(&mut edges, *previous, index);
            }
            last_on_queue.insert(node.queue, index);

            for dependency in &node.dependencies {
                match index_of.get(dependency) {
                    Some(producer) => add_edge(&mut edges, *producer, index),
                    None => log::warn!(
                        "Submission: {:?} depends on {:?}, which was not submitted this frame",
                        node.id,
                        dependency
                    ),
                }
            }
        }

        let order = topological_order(nodes.len(), &edges).ok_or_else(|| {
            let ids: Vec<u64> = nodes.iter().map(|node| node.id.raw()).collect();
            log::error!("Submission: dependency cycle among command lists {ids:?}");
            GraphicsError::DependencyCycle(format!("command lists {ids:?}"))
        })?;
        Ok(Self { order, edges })
    }

    /// Producers of `node`.
    #[cfg(test)]
    pub(crate) fn predecessors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(_, to)| *to == node)
            .map(|(from, _)| *from)
    }

    /// Whether nothing waits on `node`.
    pub(crate) fn is_sink(&self, node: usize) -> bool {
        !self.edges.iter().any(|(from, _)| *from == node)
    }
}

fn add_edge(edges: &mut Vec<(usize, usize)>, from: usize, to: usize) {
    if from != to && !edges.contains(&(from, to)) {
        edges.push((from, to));
    }
}

/// Kahn's algorithm, always taking the lowest ready index next.
fn topological_order(count: usize, edges: &[(usize, usize)]) -> Option<Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut successors = vec![Vec::new(); count];
    for (from, to) in edges {
        in_degree[*to] += 1;
        successors[*from].push(*to);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for successor in &successors[node] {
            in_degree[*successor] -= 1;
            if in_degree[*successor] == 0 {
                ready.push(Reverse(*successor));
            }
        }
    }
    (order.len() == count).then_some(order)
}

/// Semaphores of one frame slot, reused once the slot's fence signals.
#[derive(Default)]
pub(crate) struct SemaphorePool {
    available: Vec<Semaphore>,
    in_use: Vec<Semaphore>,
}

impl SemaphorePool {
    pub(crate) fn acquire(
        &mut self,
        backend: &Arc<dyn GpuBackend>,
    ) -> Result<SemaphoreHandle, GraphicsError> {
        let semaphore = match self.available.pop() {
            Some(semaphore) => semaphore,
            None => Semaphore::new(Arc::clone(backend))?,
        };
        let handle = semaphore.handle();
        self.in_use.push(semaphore);
        Ok(handle)
    }

    /// Make every semaphore handed out since the last recycle available again.
    pub(crate) fn recycle(&mut self) {
        self.available.append(&mut self.in_use);
    }

    pub(crate) fn len(&self) -> usize {
        self.available.len() + self.in_use.len()
    }
}
