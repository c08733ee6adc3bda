//! Chunk-and-merge execution.
//!
//! The work list is split into contiguous chunks ([`make_chunks`]); each chunk
//! runs on its own worker and produces an update; updates are folded back by a
//! merge callback that only ever runs on the calling (coordinating) thread,
//! one update at a time.
//!
//! ```text
//!  items ──► make_chunks ──► prepare(chunk 0) ──► worker 0 ──┐
//!                        ──► prepare(chunk 1) ──► worker 1 ──┤  completion order
//!                        ──► prepare(chunk 2) ──► worker 2 ──┤
//!                                                           ▼
//!                                            merge(chunk, update)   (calling thread)
//! ```
//!
//! Partitioning depends only on the order of the input, never on scheduling.
//! Completion order does vary, so merges must be commutative across chunks.

use std::any::Any;

use thiserror::Error;

/// Failure of a chunked execution.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Pool(String),

    /// Preparing, running or merging a chunk returned an error.
    #[error("chunk {chunk} failed: {source}")]
    Failed {
        chunk: usize,
        #[source]
        source: E,
    },

    /// A worker panicked while running a chunk.
    #[error("chunk {chunk} panicked: {message}")]
    Panicked { chunk: usize, message: String },
}

impl<E> TaskError<E> {
    /// Index of the chunk that failed, if the failure belongs to one.
    pub const fn chunk(&self) -> Option<usize> {
        match self {
            Self::Pool(_) => None,
            Self::Failed { chunk, .. } | Self::Panicked { chunk, .. } => Some(*chunk),
        }
    }
}

/// Split `items` into `min(workers, items.len())` contiguous chunks.
///
/// Chunk sizes differ by at most one; the first `len % n` chunks take the
/// extra item. An empty input yields no chunks and `workers == 0` is treated
/// as a single worker.
pub fn make_chunks<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let count = workers.clamp(1, items.len());
    let base = items.len() / count;
    let remainder = items.len() % count;

    let mut rest = items.into_iter();
    (0..count)
        .map(|index| {
            let size = base + usize::from(index < remainder);
            rest.by_ref().take(size).collect()
        })
        .collect()
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(feature = "parallel")]
pub use pool::ParallelTasks;

#[cfg(feature = "parallel")]
mod pool {
    use super::{TaskError, make_chunks, panic_message};
    use rayon::{ThreadPool, ThreadPoolBuilder};
    use std::{
        any::Any,
        panic::{self, AssertUnwindSafe},
        sync::mpsc,
    };

    /// What a worker sends back: its chunk (ownership returns to the
    /// coordinator) and the outcome of the task.
    struct Completion<P, U, E> {
        index: usize,
        chunk: Vec<P>,
        result: Result<Result<U, E>, Box<dyn Any + Send>>,
    }

    /// A fixed pool of workers executing chunks of a work list.
    ///
    /// Workers only see the chunk they were handed and whatever the task
    /// closure borrows immutably; every mutation of shared state happens in
    /// the merge callback on the calling thread.
    pub struct ParallelTasks {
        pool: ThreadPool,
        workers: usize,
    }

    impl ParallelTasks {
        /// Start a pool with `workers` threads (at least one).
        pub fn new<E>(workers: usize) -> Result<Self, TaskError<E>> {
            let workers = workers.max(1);
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("quire-worker-{index}"))
                .build()
                .map_err(|e| TaskError::Pool(e.to_string()))?;
            Ok(Self { pool, workers })
        }

        pub const fn workers(&self) -> usize {
            self.workers
        }

        /// Partition `items` across the workers, run `task` on every chunk and
        /// fold each result with `merge`.
        pub fn execute<T, U, E, Task, Merge>(
            &self,
            items: Vec<T>,
            task: Task,
            merge: Merge,
        ) -> Result<(), TaskError<E>>
        where
            T: Send,
            U: Send,
            E: Send,
            Task: Fn(&[T]) -> Result<U, E> + Sync,
            Merge: FnMut(Vec<T>, U) -> Result<(), E>,
        {
            let chunks = make_chunks(items, self.workers);
            self.execute_chunks(chunks, Ok, task, merge)
        }

        /// Run pre-partitioned chunks.
        ///
        /// `prepare` runs on the calling thread right before a chunk is
        /// dispatched, so chunk `n + 1` is prepared while chunk `n` is still
        /// running. Finished chunks are merged between preparations and after
        /// the last dispatch.
        ///
        /// On the first failure no further chunks are dispatched; chunks that
        /// are already running are awaited and, when they succeed, merged.
        /// The first failure is then returned.
        pub fn execute_chunks<T, P, U, E, Prepare, Task, Merge>(
            &self,
            chunks: Vec<Vec<T>>,
            mut prepare: Prepare,
            task: Task,
            mut merge: Merge,
        ) -> Result<(), TaskError<E>>
        where
            P: Send,
            U: Send,
            E: Send,
            Prepare: FnMut(Vec<T>) -> Result<Vec<P>, E>,
            Task: Fn(&[P]) -> Result<U, E> + Sync,
            Merge: FnMut(Vec<P>, U) -> Result<(), E>,
        {
            let (sender, receiver) = mpsc::channel::<Completion<P, U, E>>();
            let mut failure: Option<TaskError<E>> = None;
            let task = &task;

            self.pool.in_place_scope(|scope| {
                let mut in_flight = 0usize;

                for (index, chunk) in chunks.into_iter().enumerate() {
                    while let Ok(done) = receiver.try_recv() {
                        in_flight -= 1;
                        settle(done, &mut merge, &mut failure);
                    }
                    if failure.is_some() {
                        break;
                    }

                    let prepared = match prepare(chunk) {
                        Ok(prepared) => prepared,
                        Err(source) => {
                            failure = Some(TaskError::Failed { chunk: index, source });
                            break;
                        }
                    };

                    let sender = sender.clone();
                    in_flight += 1;
                    scope.spawn(move |_| {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&prepared)));
                        // The receiver lives until every spawned worker has reported.
                        let _ = sender.send(Completion {
                            index,
                            chunk: prepared,
                            result,
                        });
                    });
                }

                while in_flight > 0 {
                    let Ok(done) = receiver.recv() else {
                        break;
                    };
                    in_flight -= 1;
                    settle(done, &mut merge, &mut failure);
                }
            });

            failure.map_or(Ok(()), Err)
        }
    }

    /// Merge one completion, or record it as the failure if none is recorded yet.
    fn settle<P, U, E, Merge>(
        done: Completion<P, U, E>,
        merge: &mut Merge,
        failure: &mut Option<TaskError<E>>,
    ) where
        Merge: FnMut(Vec<P>, U) -> Result<(), E>,
    {
        let Completion { index, chunk, result } = done;
        let error = match result {
            Ok(Ok(update)) => match merge(chunk, update) {
                Ok(()) => return,
                Err(source) => TaskError::Failed { chunk: index, source },
            },
            Ok(Err(source)) => TaskError::Failed { chunk: index, source },
            Err(payload) => TaskError::Panicked {
                chunk: index,
                message: panic_message(payload.as_ref()),
            },
        };
        failure.get_or_insert(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_chunks_sizes() {
        let chunks = make_chunks((0..10).collect(), 4);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
        // contiguous, original order
        assert_eq!(chunks.concat(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_make_chunks_more_workers_than_items() {
        let chunks = make_chunks(vec!["a", "b"], 8);
        assert_eq!(chunks, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_make_chunks_empty_and_zero_workers() {
        assert!(make_chunks(Vec::<u8>::new(), 4).is_empty());
        assert_eq!(make_chunks(vec![1, 2, 3], 0), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[cfg(feature = "parallel")]
    mod workers {
        use super::super::*;
        use std::collections::BTreeSet;
        use std::thread;

        fn sum_with(workers: usize, items: Vec<u64>) -> (u64, usize) {
            let tasks = ParallelTasks::new::<String>(workers).unwrap();
            let mut total = 0;
            let mut merges = 0;
            tasks
                .execute(
                    items,
                    |chunk| Ok::<_, String>(chunk.iter().sum::<u64>()),
                    |_, partial| {
                        total += partial;
                        merges += 1;
                        Ok(())
                    },
                )
                .unwrap();
            (total, merges)
        }

        #[test]
        fn test_result_independent_of_worker_count() {
            let items: Vec<u64> = (1..=100).collect();
            for workers in [1, 2, 4] {
                let (total, merges) = sum_with(workers, items.clone());
                assert_eq!(total, 5050);
                assert_eq!(merges, workers);
            }
        }

        #[test]
        fn test_merge_and_prepare_run_on_calling_thread() {
            let caller = thread::current().id();
            let tasks = ParallelTasks::new::<String>(3).unwrap();
            let mut seen: BTreeSet<u32> = BTreeSet::new();

            tasks
                .execute_chunks(
                    make_chunks((0..9).collect::<Vec<u32>>(), 3),
                    |chunk| {
                        assert_eq!(thread::current().id(), caller);
                        Ok(chunk.into_iter().map(|n| n * 10).collect::<Vec<u32>>())
                    },
                    |chunk| Ok::<_, String>(chunk.to_vec()),
                    |chunk, update| {
                        assert_eq!(thread::current().id(), caller);
                        assert_eq!(chunk, update);
                        seen.extend(update);
                        Ok(())
                    },
                )
                .unwrap();

            assert_eq!(seen, (0..9).map(|n| n * 10).collect());
        }

        #[test]
        fn test_failure_surfaces_after_other_chunks_merge() {
            let tasks = ParallelTasks::new::<String>(4).unwrap();
            let mut merged = Vec::new();

            let err = tasks
                .execute(
                    vec![1, 2, 3, 4],
                    |chunk| {
                        if chunk == [3] {
                            Err(format!("cannot read {}", chunk[0]))
                        } else {
                            Ok(chunk[0])
                        }
                    },
                    |_, value| {
                        merged.push(value);
                        Ok(())
                    },
                )
                .unwrap_err();

            assert_eq!(err.chunk(), Some(2));
            assert!(matches!(err, TaskError::Failed { ref source, .. } if source == "cannot read 3"));
            merged.sort_unstable();
            assert_eq!(merged, vec![1, 2, 4]);
        }

        #[test]
        fn test_panicking_worker_is_reported() {
            let tasks = ParallelTasks::new::<String>(2).unwrap();
            let err = tasks
                .execute(
                    vec!["ok", "boom"],
                    |chunk| {
                        if chunk[0] == "boom" {
                            panic!("worker exploded");
                        }
                        Ok::<_, String>(())
                    },
                    |_, ()| Ok(()),
                )
                .unwrap_err();

            match err {
                TaskError::Panicked { chunk, message } => {
                    assert_eq!(chunk, 1);
                    assert_eq!(message, "worker exploded");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_prepare_failure_stops_dispatch() {
            let tasks = ParallelTasks::new::<String>(1).unwrap();
            let mut ran = Vec::new();

            let err = tasks
                .execute_chunks(
                    vec![vec![1], vec![2], vec![3]],
                    |chunk: Vec<i32>| {
                        if chunk[0] == 2 {
                            Err("unresolvable".to_owned())
                        } else {
                            Ok(chunk)
                        }
                    },
                    |chunk| Ok::<_, String>(chunk[0]),
                    |_, value| {
                        ran.push(value);
                        Ok(())
                    },
                )
                .unwrap_err();

            assert_eq!(err.chunk(), Some(1));
            assert_eq!(ran, vec![1]);
        }
    }
}
