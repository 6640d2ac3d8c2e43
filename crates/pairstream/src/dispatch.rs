//! # Pair Dispatch
//!
//! Runs a callback over every enabled pair, in parallel where the routing
//! flags allow it.
//!
//! ```text
//! flags                         phases (each phase waits for the previous)
//! ─────────────────────────     ──────────────────────────────────────────
//! none                          bucket streams ║ island streams ║ rest
//! needs islanding               island mixed, then as above
//! alias checks / cross reads    islands over all pairs          ║ rest
//!
//! "rest" is the mixed and invalid streams, run on one thread.
//! ```
//!
//! Within a phase, tasks are pulled from a shared queue by a fixed pool of
//! scoped worker threads. A task's pairs run in storage order on one thread.

use std::iter;
use std::sync::Arc;
use std::thread;

use pairstream_core::Block;
use tracing::{debug, trace};

use crate::error::PairStreamResult;
use crate::islands::{collect_slots, Islands, PairSlot};
use crate::stream::{Enumerator, Pair, PairStream, ParallelWriter, StreamState};

/// How [`PairStream::for_each_pair_parallel`] splits the work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchStrategy {
    /// Everything on the calling thread.
    Sequential,
    /// Bucket streams in parallel, then island streams in parallel.
    BucketStreams,
    /// Mixed pairs are islanded first, then as [`DispatchStrategy::BucketStreams`].
    IslandedMixed,
    /// Islands over every pair, in parallel.
    IslandGroups,
}

type Task = Vec<PairSlot>;

impl PairStream {
    /// The strategy [`PairStream::for_each_pair_parallel`] would use.
    #[must_use]
    pub fn dispatch_strategy(&self, workers: usize) -> DispatchStrategy {
        let state = self.state();
        if workers <= 1 {
            DispatchStrategy::Sequential
        } else if state.needs_alias_checks() || state.has_cross_bucket_reads() {
            DispatchStrategy::IslandGroups
        } else if state.needs_islanding() {
            DispatchStrategy::IslandedMixed
        } else {
            DispatchStrategy::BucketStreams
        }
    }

    /// Calls `f` for every enabled pair on the calling thread, in
    /// enumeration order. Returns the number of pairs visited.
    ///
    /// # Errors
    ///
    /// Propagates enumeration errors.
    pub fn for_each_pair<F>(&mut self, mut f: F) -> PairStreamResult<usize>
    where
        F: FnMut(&mut Pair),
    {
        let mut visited = 0;
        for pair in Enumerator::new(Arc::clone(self.state()), true) {
            let mut pair = pair?;
            if pair.enabled() {
                f(&mut pair);
                visited += 1;
            }
        }
        Ok(visited)
    }

    /// Calls `f` for every enabled pair on up to `workers` threads.
    ///
    /// Two pairs that write the same entity, or where one writes an entity
    /// the other reads, never run at the same time. The writer passed to `f`
    /// may add pairs; they are not visited by this call.
    ///
    /// # Errors
    ///
    /// Fails if islanding fails or storage errors occur while collecting.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from `f`.
    pub fn for_each_pair_parallel<F>(&mut self, workers: usize, f: F) -> PairStreamResult<DispatchStrategy>
    where
        F: Fn(&mut Pair, &ParallelWriter<'_>) + Sync,
    {
        let chosen = self.dispatch_strategy(workers);
        debug!(strategy = ?chosen, workers, pairs = self.pair_count(), "dispatching pairs");

        let mut keep: Vec<Arc<Block>> = Vec::new();
        let phases: Vec<Vec<Task>> = match chosen {
            DispatchStrategy::Sequential => {
                let strategy = self.strategy();
                vec![vec![collect_slots(
                    self.state(),
                    0..strategy.stream_count(),
                    true,
                    &mut keep,
                )?]]
            }
            DispatchStrategy::BucketStreams | DispatchStrategy::IslandedMixed => {
                if chosen == DispatchStrategy::IslandedMixed {
                    self.island_mixed_pairs()?;
                }
                let state = self.state();
                let strategy = state.strategy();
                vec![
                    stream_tasks(state, strategy.bucket_streams(), &mut keep)?,
                    stream_tasks(state, strategy.island_streams(), &mut keep)?,
                    vec![collect_slots(
                        state,
                        [strategy.mixed_stream(), strategy.invalid_stream()],
                        true,
                        &mut keep,
                    )?],
                ]
            }
            DispatchStrategy::IslandGroups => {
                let (groups, blocks) = Islands::build(self)?.into_parts();
                keep.extend(blocks);
                let state = self.state();
                let invalid = state.strategy().invalid_stream();
                vec![groups, vec![collect_slots(state, iter::once(invalid), true, &mut keep)?]]
            }
        };

        let state = self.state();
        let version = state.pair_pointer_version();
        let writer = self.parallel_writer();
        for tasks in phases {
            run_phase(state, version, tasks, workers, &writer, &f);
        }
        drop(writer);
        drop(keep);
        state.retire(Vec::new());
        Ok(chosen)
    }
}

/// One task per stream in `streams`.
fn stream_tasks(
    state: &StreamState,
    streams: impl Iterator<Item = usize>,
    keep: &mut Vec<Arc<Block>>,
) -> PairStreamResult<Vec<Task>> {
    streams
        .map(|stream| collect_slots(state, iter::once(stream), true, keep))
        .collect()
}

fn run_phase<F>(
    state: &Arc<StreamState>,
    version: u64,
    tasks: Vec<Task>,
    workers: usize,
    writer: &ParallelWriter<'_>,
    f: &F,
) where
    F: Fn(&mut Pair, &ParallelWriter<'_>) + Sync,
{
    let tasks: Vec<Task> = tasks.into_iter().filter(|task| !task.is_empty()).collect();
    let threads = workers.min(tasks.len());
    trace!(tasks = tasks.len(), threads, "running dispatch phase");
    if threads <= 1 {
        for task in tasks {
            run_task(state, version, task, writer, f);
        }
        return;
    }

    let (sender, receiver) = crossbeam_channel::unbounded();
    for task in tasks {
        if sender.send(task).is_err() {
            break;
        }
    }
    drop(sender);

    thread::scope(|scope| {
        for _ in 0..threads {
            let receiver = receiver.clone();
            scope.spawn(move || {
                for task in receiver {
                    run_task(state, version, task, writer, f);
                }
            });
        }
    });
}

fn run_task<F>(state: &Arc<StreamState>, version: u64, task: Task, writer: &ParallelWriter<'_>, f: &F)
where
    F: Fn(&mut Pair, &ParallelWriter<'_>),
{
    for slot in task {
        let mut pair = Pair::new(Arc::clone(state), slot.header, slot.stream, version, true);
        f(&mut pair, writer);
    }
}
