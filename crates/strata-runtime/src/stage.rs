use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Sender, bounded};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Per-worker state of a stage. A worker owns the senders of the next
/// stage, so dropping the last worker disconnects its successor.
pub trait StageWorker<T>: Send + 'static {
    fn process(&mut self, job: T);

    /// Called once after the input disconnects and the queue drains.
    fn finish(&mut self) {}
}

#[derive(Default)]
struct StageCounters {
    queued: AtomicUsize,
    inflight: AtomicUsize,
    done: AtomicUsize,
    panicked: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageStats {
    pub queued: usize,
    pub inflight: usize,
    pub done: usize,
    /// Jobs abandoned because the worker panicked.
    pub panicked: usize,
}

impl fmt::Display for StageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}q/{}w/{}d", self.queued, self.inflight, self.done)?;
        if self.panicked > 0 {
            write!(f, "/{}p", self.panicked)?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Posting side of a stage's bounded queue.
pub struct StageInput<T> {
    tx: Sender<T>,
    counters: Arc<StageCounters>,
}

impl<T> Clone for StageInput<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> StageInput<T> {
    /// Blocks while the queue is full. False once every worker has exited.
    pub fn post(&self, job: T) -> bool {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// A named pool of workers draining one bounded queue.
pub struct Stage {
    name: &'static str,
    workers: usize,
    counters: Arc<StageCounters>,
    _pool: Arc<ThreadPool>,
}

impl Stage {
    /// Starts `workers` threads named `strata-<name>-<i>`, each running the
    /// worker built by `make` for its index.
    pub fn spawn<T, W>(
        name: &'static str,
        workers: usize,
        capacity: usize,
        mut make: impl FnMut(usize) -> W,
    ) -> (StageInput<T>, Stage)
    where
        T: Send + 'static,
        W: StageWorker<T>,
    {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<T>(capacity.max(1));
        let counters = Arc::new(StageCounters::default());
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(move |i| format!("strata-{name}-{i}"))
                .build()
                .expect("stage pool"),
        );
        for i in 0..workers {
            let rx = rx.clone();
            let counters = Arc::clone(&counters);
            let mut worker = make(i);
            pool.spawn(move || {
                while let Ok(job) = rx.recv() {
                    counters.queued.fetch_sub(1, Ordering::Relaxed);
                    counters.inflight.fetch_add(1, Ordering::Relaxed);
                    // A panicking job is dropped; the worker keeps draining so
                    // upstream never blocks on a dead queue.
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.process(job)));
                    counters.inflight.fetch_sub(1, Ordering::Relaxed);
                    match outcome {
                        Ok(()) => {
                            counters.done.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(payload) => {
                            counters.panicked.fetch_add(1, Ordering::Relaxed);
                            log::error!(
                                target: "pipeline",
                                "{} worker {} panicked: {}",
                                name,
                                i,
                                panic_message(payload.as_ref())
                            );
                        }
                    }
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| worker.finish())) {
                    log::error!(
                        target: "pipeline",
                        "{} worker {} panicked while finishing: {}",
                        name,
                        i,
                        panic_message(payload.as_ref())
                    );
                }
                log::trace!(target: "pipeline", "{} worker {} finished", name, i);
            });
        }
        log::debug!(
            target: "pipeline",
            "stage {} started: {} workers, queue {}",
            name,
            workers,
            capacity.max(1)
        );
        (
            StageInput {
                tx,
                counters: Arc::clone(&counters),
            },
            Stage {
                name,
                workers,
                counters,
                _pool: pool,
            },
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> StageStats {
        StageStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            inflight: self.counters.inflight.load(Ordering::Relaxed),
            done: self.counters.done.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, unbounded};

    struct Doubler {
        out: StageInput<u32>,
    }

    impl StageWorker<u32> for Doubler {
        fn process(&mut self, job: u32) {
            self.out.post(job * 2);
        }
    }

    struct Collect {
        seen: Vec<u32>,
        done: Sender<Vec<u32>>,
    }

    impl StageWorker<u32> for Collect {
        fn process(&mut self, job: u32) {
            self.seen.push(job);
        }

        fn finish(&mut self) {
            let _ = self.done.send(std::mem::take(&mut self.seen));
        }
    }

    #[test]
    fn disconnection_flows_downstream() {
        let (done_tx, done_rx) = unbounded();
        let (sink, sink_stage) = Stage::spawn("sink", 1, 4, |_| Collect {
            seen: Vec::new(),
            done: done_tx.clone(),
        });
        drop(done_tx);
        let (input, double_stage) = Stage::spawn("double", 3, 2, |_| Doubler { out: sink.clone() });
        drop(sink);

        for i in 0..50 {
            assert!(input.post(i));
        }
        drop(input);

        let mut seen = done_rx.recv().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(double_stage.workers(), 3);
        assert_eq!(double_stage.stats().done, 50);
        assert_eq!(sink_stage.stats().done, 50);
        assert_eq!(sink_stage.stats().queued, 0);
    }

    struct FragileDoubler {
        out: StageInput<u32>,
    }

    impl StageWorker<u32> for FragileDoubler {
        fn process(&mut self, job: u32) {
            if job % 10 == 3 {
                panic!("cannot double {}", job);
            }
            self.out.post(job * 2);
        }
    }

    #[test]
    fn panicking_jobs_are_dropped_and_the_stage_drains() {
        let (done_tx, done_rx) = unbounded();
        let (sink, sink_stage) = Stage::spawn("sink", 1, 4, |_| Collect {
            seen: Vec::new(),
            done: done_tx.clone(),
        });
        drop(done_tx);
        let (input, fragile) = Stage::spawn("fragile", 2, 2, |_| FragileDoubler { out: sink.clone() });
        drop(sink);

        for i in 0..30 {
            assert!(input.post(i));
        }
        drop(input);

        let mut seen = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("sink finished after upstream disconnected");
        seen.sort_unstable();
        let expected: Vec<u32> = (0..30).filter(|i| i % 10 != 3).map(|i| i * 2).collect();
        assert_eq!(seen, expected);
        let stats = fragile.stats();
        assert_eq!((stats.done, stats.panicked, stats.inflight), (27, 3, 0));
        assert_eq!(sink_stage.stats().done, 27);
        assert!(stats.to_string().ends_with("/3p"));
    }

    struct Gated {
        started: Sender<u32>,
        gate: Receiver<()>,
    }

    impl StageWorker<u32> for Gated {
        fn process(&mut self, job: u32) {
            let _ = self.started.send(job);
            let _ = self.gate.recv();
        }
    }

    #[test]
    fn post_blocks_while_the_queue_is_full() {
        let (started_tx, started_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (input, stage) = Stage::spawn("gated", 1, 1, |_| Gated {
            started: started_tx.clone(),
            gate: gate_rx.clone(),
        });

        // the worker holds job 0, job 1 fills the queue
        assert!(input.post(0));
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
        assert!(input.post(1));

        let (posted_tx, posted_rx) = unbounded();
        let producer = {
            let input = input.clone();
            thread::spawn(move || {
                let ok = input.post(2);
                let _ = posted_tx.send(ok);
            })
        };
        assert!(posted_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(stage.stats().queued, 2);

        // closing the gate releases every job
        drop(gate_tx);
        assert_eq!(posted_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        producer.join().unwrap();
        drop(input);
        let rest: Vec<u32> = started_rx.iter().take(2).collect();
        assert_eq!(rest, vec![1, 2]);
    }
}
