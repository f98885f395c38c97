//! GPU timing of named, nested scopes.
//!
//! Each recording thread takes a [`ThreadProfile`] from the [`GpuProfiler`],
//! brackets work in its command list with [`ThreadProfile::begin_query`] and
//! [`ThreadProfile::end_query`], and hands the profile back with
//! [`GpuProfiler::end_thread`]. Timestamps are read back once the frame that
//! wrote them can no longer be in flight, so results lag the current frame.
//!
//! ```ignore
//! let profiler = GpuProfiler::new(device.clone());
//!
//! let mut cmd = device.get_command_list(QueueType::Graphics)?;
//! cmd.begin_commands()?;
//! let mut profile = profiler.begin_thread("main", &mut cmd)?;
//! profile.begin_query(&mut cmd, "shadows");
//! // record shadow passes
//! profile.end_query(&mut cmd);
//! profiler.end_thread(profile);
//! // end, submit, complete the frame
//!
//! profiler.begin_frame()?;
//! for thread in profiler.queries_average(32, QueryOrder::MaxTime) {
//!     // draw thread.queries
//! }
//! ```
//!
//! Durations are in backend timestamp ticks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::CommandList;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::QueryPool;
use crate::types::{PipelineStage, QueryPoolDescriptor, QueryType};

/// Timestamps available to one thread per frame (two per scope).
pub const DEFAULT_QUERIES_PER_THREAD: u32 = 256;

/// Frames of results kept per thread name.
pub const DEFAULT_HISTORY_LENGTH: usize = 64;

/// A timed scope and the scopes nested inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuQuery {
    pub name: String,
    /// Elapsed timestamp ticks between the start and end of the scope.
    pub elapsed: u64,
    pub children: Vec<GpuQuery>,
}

/// All top-level scopes recorded under one thread name in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadQueries {
    pub name: String,
    pub queries: Vec<GpuQuery>,
}

/// Ordering of sibling queries in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Recording order.
    #[default]
    Chrono,
    /// Longest first.
    MaxTime,
    /// Shortest first.
    MinTime,
}

#[derive(Debug)]
struct OpenQuery {
    name: String,
    start: Option<u32>,
    end: Option<u32>,
    children: Vec<OpenQuery>,
}

/// Scopes recorded by one thread into one command list.
#[derive(Debug)]
pub struct ThreadProfile {
    name: String,
    frame: u64,
    pool: Arc<QueryPool>,
    next_query: u32,
    stack: Vec<OpenQuery>,
    roots: Vec<OpenQuery>,
}

impl ThreadProfile {
    /// Thread name the results are filed under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Depth of currently open scopes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn take_slot(&mut self) -> Option<u32> {
        if self.next_query >= self.pool.count() {
            log::warn!(
                "GpuProfiler: thread '{}' ran out of timestamp queries ({})",
                self.name,
                self.pool.count()
            );
            return None;
        }
        let slot = self.next_query;
        self.next_query += 1;
        Some(slot)
    }

    /// Open a scope named `name` nested in the current one.
    pub fn begin_query(&mut self, cmd: &mut CommandList, name: impl Into<String>) {
        let start = self.take_slot();
        if let Some(slot) = start {
            cmd.write_timestamp(&self.pool, slot, PipelineStage::TOP_OF_PIPE);
        }
        self.stack.push(OpenQuery {
            name: name.into(),
            start,
            end: None,
            children: Vec::new(),
        });
    }

    /// Close the innermost open scope.
    pub fn end_query(&mut self, cmd: &mut CommandList) {
        let Some(mut query) = self.stack.pop() else {
            log::warn!("GpuProfiler: end_query on thread '{}' without an open scope", self.name);
            return;
        };
        if query.start.is_some() {
            query.end = self.take_slot();
            if let Some(slot) = query.end {
                cmd.write_timestamp(&self.pool, slot, PipelineStage::BOTTOM_OF_PIPE);
            }
        }
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(query),
            None => self.roots.push(query),
        }
    }

    /// Close the innermost scope and open a sibling named `name`.
    pub fn end_and_begin_query(&mut self, cmd: &mut CommandList, name: impl Into<String>) {
        self.end_query(cmd);
        self.begin_query(cmd, name);
    }
}

#[derive(Default)]
struct ProfilerState {
    free_pools: Vec<Arc<QueryPool>>,
    pending: VecDeque<ThreadProfile>,
    /// Per thread name, `(frame, queries)` with the newest frame at the back.
    history: HashMap<String, VecDeque<(u64, Vec<GpuQuery>)>>,
}

/// Collects timestamp scopes from any number of recording threads.
pub struct GpuProfiler {
    device: Arc<GraphicsDevice>,
    queries_per_thread: u32,
    history_length: usize,
    state: Mutex<ProfilerState>,
}

impl GpuProfiler {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self::with_limits(device, DEFAULT_QUERIES_PER_THREAD, DEFAULT_HISTORY_LENGTH)
    }

    pub fn with_limits(
        device: Arc<GraphicsDevice>,
        queries_per_thread: u32,
        history_length: usize,
    ) -> Self {
        Self {
            device,
            queries_per_thread: queries_per_thread.max(2),
            history_length: history_length.max(1),
            state: Mutex::new(ProfilerState::default()),
        }
    }

    /// Start profiling `name` in `cmd`, which must be recording.
    ///
    /// Resets the query pool the profile writes to inside `cmd`.
    pub fn begin_thread(
        &self,
        name: impl Into<String>,
        cmd: &mut CommandList,
    ) -> Result<ThreadProfile, GraphicsError> {
        let recycled = self.state.lock().free_pools.pop();
        let pool = match recycled {
            Some(pool) => pool,
            None => self.device.create_query_pool(
                &QueryPoolDescriptor::new(QueryType::Timestamp, self.queries_per_thread)
                    .with_label("gpu_profiler"),
            )?,
        };
        cmd.reset_query_pool(&pool, 0, pool.count());
        Ok(ThreadProfile {
            name: name.into(),
            frame: self.device.frame_index(),
            pool,
            next_query: 0,
            stack: Vec::new(),
            roots: Vec::new(),
        })
    }

    /// Hand a finished profile back for evaluation once its frame retires.
    ///
    /// Scopes still open are dropped.
    pub fn end_thread(&self, mut profile: ThreadProfile) {
        if !profile.stack.is_empty() {
            log::warn!(
                "GpuProfiler: thread '{}' ended with {} open scopes",
                profile.name,
                profile.stack.len()
            );
            profile.stack.clear();
        }
        self.state.lock().pending.push_back(profile);
    }

    /// Evaluate every profile whose frame can no longer be in flight.
    ///
    /// Call once per frame after the device advanced it.
    pub fn begin_frame(&self) -> Result<(), GraphicsError> {
        let current = self.device.frame_index();
        let retire_after = self.device.parameters().frames_to_deletion;
        let mut state = self.state.lock();
        while state
            .pending
            .front()
            .is_some_and(|profile| profile.frame + retire_after <= current)
        {
            let Some(profile) = state.pending.pop_front() else {
                break;
            };
            let timestamps = if profile.next_query > 0 {
                profile.pool.results(0, profile.next_query)?
            } else {
                Vec::new()
            };
            let queries: Vec<GpuQuery> = profile
                .roots
                .iter()
                .map(|query| evaluate(query, &timestamps))
                .collect();

            let frames = state.history.entry(profile.name).or_default();
            match frames.back_mut() {
                Some((frame, existing)) if *frame == profile.frame => existing.extend(queries),
                _ => frames.push_back((profile.frame, queries)),
            }
            while frames.len() > self.history_length {
                frames.pop_front();
            }
            state.free_pools.push(profile.pool);
        }
        Ok(())
    }

    /// Queries of the most recent evaluated frame, one entry per thread.
    pub fn queries(&self, order: QueryOrder) -> Vec<ThreadQueries> {
        self.queries_average(1, order)
    }

    /// Queries averaged over the last `frame_count` evaluated frames.
    ///
    /// Scopes are matched by name among their siblings; a scope absent in a
    /// frame does not count toward its average.
    pub fn queries_average(&self, frame_count: usize, order: QueryOrder) -> Vec<ThreadQueries> {
        let state = self.state.lock();
        let mut threads: Vec<ThreadQueries> = state
            .history
            .iter()
            .filter(|(_, frames)| !frames.is_empty())
            .map(|(name, frames)| {
                let recent: Vec<&[GpuQuery]> = frames
                    .iter()
                    .rev()
                    .take(frame_count.max(1))
                    .map(|(_, queries)| queries.as_slice())
                    .collect();
                let mut queries = average(&recent);
                order_queries(&mut queries, order);
                ThreadQueries {
                    name: name.clone(),
                    queries,
                }
            })
            .collect();
        threads.sort_by(|a, b| a.name.cmp(&b.name));
        threads
    }

    /// Profiles awaiting evaluation.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl std::fmt::Debug for GpuProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GpuProfiler")
            .field("queries_per_thread", &self.queries_per_thread)
            .field("pending", &state.pending.len())
            .field("threads", &state.history.len())
            .finish()
    }
}

fn evaluate(query: &OpenQuery, timestamps: &[u64]) -> GpuQuery {
    let stamp = |slot: Option<u32>| slot.and_then(|slot| timestamps.get(slot as usize).copied());
    let elapsed = match (stamp(query.start), stamp(query.end)) {
        (Some(start), Some(end)) => end.saturating_sub(start),
        _ => 0,
    };
    GpuQuery {
        name: query.name.clone(),
        elapsed,
        children: query
            .children
            .iter()
            .map(|child| evaluate(child, timestamps))
            .collect(),
    }
}

/// Average sibling lists from several frames; the newest frame sets the shape.
fn average(frames: &[&[GpuQuery]]) -> Vec<GpuQuery> {
    let Some(newest) = frames.first() else {
        return Vec::new();
    };
    newest
        .iter()
        .map(|query| {
            let matches: Vec<&GpuQuery> = frames
                .iter()
                .filter_map(|siblings| siblings.iter().find(|q| q.name == query.name))
                .collect();
            let total: u64 = matches.iter().map(|q| q.elapsed).sum();
            let children: Vec<&[GpuQuery]> =
                matches.iter().map(|q| q.children.as_slice()).collect();
            GpuQuery {
                name: query.name.clone(),
                elapsed: total / matches.len() as u64,
                children: average(&children),
            }
        })
        .collect()
}

fn order_queries(queries: &mut [GpuQuery], order: QueryOrder) {
    match order {
        QueryOrder::Chrono => {}
        QueryOrder::MaxTime => queries.sort_by(|a, b| b.elapsed.cmp(&a.elapsed)),
        QueryOrder::MinTime => queries.sort_by(|a, b| a.elapsed.cmp(&b.elapsed)),
    }
    for query in queries {
        order_queries(&mut query.children, order);
    }
}
