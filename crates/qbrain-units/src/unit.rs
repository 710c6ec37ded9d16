use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qbrain_core::UnitField;
use qbrain_store::{KeyValueStore, SharedStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{Result, UnitError};
use crate::identity::UnitIdentity;

/// What a unit does on every tick, and which keys it owns besides `class`.
pub trait UnitTask: Send + Sync + 'static {
    /// Type name written to `"<id> class"`.
    fn class_name(&self) -> &'static str;

    /// One discrete unit of work. Called once per period, never concurrently
    /// with itself.
    fn unit_task(&self, id: &str, store: &dyn KeyValueStore) -> Result<()>;

    /// Remove every key this task publishes. `"<id> class"` is removed by the caller.
    fn clean_store(&self, id: &str, store: &dyn KeyValueStore) -> Result<()>;
}

/// A periodically executing worker: identity, shared store handle and at most
/// one background loop.
///
/// The loop runs [`UnitTask::unit_task`] on the blocking pool, then sleeps for
/// the period, until told to stop. There is no catch-up on overrun: a slow
/// task simply delays the next tick.
pub struct BaseUnit<T: UnitTask> {
    identity: UnitIdentity,
    task: Arc<T>,
    store: SharedStore,
    worker: Mutex<Worker>,
    /// Serializes `stop()` calls so a second caller waits for the cleanup.
    stop_lock: tokio::sync::Mutex<()>,
}

enum Worker {
    Idle,
    Running {
        handle: JoinHandle<Result<()>>,
        shutdown: watch::Sender<bool>,
    },
    /// `stop()` owns the loop and has not finished cleaning the store.
    Stopping,
}

impl Worker {
    fn is_live(&self) -> bool {
        match self {
            Worker::Idle => false,
            Worker::Running { handle, .. } => !handle.is_finished(),
            Worker::Stopping => true,
        }
    }
}

/// Puts the worker slot back to `Idle` when `stop()` returns or is dropped.
struct IdleOnDrop<'a>(&'a Mutex<Worker>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = Worker::Idle;
    }
}

impl<T: UnitTask> BaseUnit<T> {
    pub(crate) fn from_parts(identity: UnitIdentity, task: T, store: SharedStore) -> Self {
        tracing::debug!(unit = %identity.id(), "initializing {}", task.class_name());
        Self {
            identity,
            task: Arc::new(task),
            store,
            worker: Mutex::new(Worker::Idle),
            stop_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn period(&self) -> Duration {
        self.identity.period()
    }

    pub fn class_name(&self) -> &'static str {
        self.task.class_name()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn task(&self) -> &T {
        &self.task
    }

    /// Whether a background loop is alive, including one that `stop()` is
    /// still winding down. A loop that died on a publish failure no longer
    /// counts as running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_live()
    }

    /// Spawn the background loop and register `"<id> class"`.
    ///
    /// Starting a running unit only logs a warning. A unit whose loop crashed
    /// is started again from its current state. Refused while `stop()` is in
    /// progress.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        match &*worker {
            Worker::Stopping => {
                return Err(UnitError::Stopping {
                    id: self.id().to_string(),
                });
            }
            live if live.is_live() => {
                tracing::warn!(unit = %self.id(), "{} is already started", self.class_name());
                return Ok(());
            }
            _ => {}
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| UnitError::NoRuntime {
            id: self.id().to_string(),
        })?;

        tracing::info!(unit = %self.id(), "starting {}", self.class_name());
        self.store
            .set(&UnitField::Class.key(self.id()), self.class_name())?;

        let span = tracing::info_span!("unit", unit = %self.id());
        let (shutdown, signal) = watch::channel(false);
        let task = Arc::clone(&self.task);
        let store = Arc::clone(&self.store);
        let id = self.id().to_string();
        let period = self.period();
        let handle = runtime.spawn(run_loop(id, period, task, store, signal).instrument(span));
        *worker = Worker::Running { handle, shutdown };
        Ok(())
    }

    /// Terminate the loop, then remove every key this unit owns.
    ///
    /// When this returns no further tick will run and the store holds no
    /// `"<id> *"` key. A tick already in progress is allowed to finish first;
    /// it is never interrupted halfway. Until then `tick()` and `start()` are
    /// refused. Stopping a unit that is not running only logs a warning.
    ///
    /// Dropping the returned future before it completes leaves the store
    /// uncleaned, as dropping a running unit does.
    pub async fn stop(&self) -> Result<()> {
        let _serial = self.stop_lock.lock().await;
        let (handle, shutdown) = {
            let mut worker = self.worker.lock();
            match std::mem::replace(&mut *worker, Worker::Stopping) {
                Worker::Running { handle, shutdown } => (handle, shutdown),
                previous => {
                    *worker = previous;
                    tracing::warn!(unit = %self.id(), "{} is not running", self.class_name());
                    return Ok(());
                }
            }
        };
        let _idle = IdleOnDrop(&self.worker);

        tracing::info!(unit = %self.id(), "stopping {}", self.class_name());
        shutdown.send_replace(true);
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(unit = %self.id(), "loop had already exited: {e}");
            }
            Err(e) => tracing::error!(unit = %self.id(), "loop panicked: {e}"),
        }

        tracing::info!(unit = %self.id(), "cleaning shared store");
        self.task.clean_store(self.id(), self.store.as_ref())?;
        self.store.delete(&UnitField::Class.key(self.id()))?;
        Ok(())
    }

    /// Run one task synchronously on the caller's thread, outside the loop.
    /// Refused while the background loop is running or stopping.
    pub fn tick(&self) -> Result<()> {
        let worker = self.worker.lock();
        match &*worker {
            Worker::Stopping => Err(UnitError::Stopping {
                id: self.id().to_string(),
            }),
            live if live.is_live() => Err(UnitError::Busy {
                id: self.id().to_string(),
            }),
            _ => self.task.unit_task(self.id(), self.store.as_ref()),
        }
    }
}

/// Tick, then wait out the period unless shutdown is signalled. The signal is
/// only observed between ticks.
async fn run_loop<T: UnitTask>(
    id: String,
    period: Duration,
    task: Arc<T>,
    store: SharedStore,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        // store I/O may block on a locked SQLite file
        let tick = {
            let task = Arc::clone(&task);
            let store = Arc::clone(&store);
            let id = id.clone();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                span.in_scope(|| task.unit_task(&id, store.as_ref()))
            })
        };
        match tick.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("{} loop terminated: {e}", task.class_name());
                return Err(e);
            }
            Err(e) => {
                tracing::error!("{} task panicked: {e}", task.class_name());
                return Err(e.into());
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(period) => {}
        }
    }
}

impl<T: UnitTask> Drop for BaseUnit<T> {
    fn drop(&mut self) {
        if let Worker::Running { handle, .. } =
            std::mem::replace(self.worker.get_mut(), Worker::Idle)
        {
            handle.abort();
            tracing::warn!(
                unit = %self.identity.id(),
                "dropped while running; loop aborted, shared store not cleaned"
            );
        }
    }
}

impl<T: UnitTask> fmt::Debug for BaseUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.class_name())
            .field("id", &self.id())
            .field("name", &self.name())
            .field("period", &self.period())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbrain_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl UnitTask for Counter {
        fn class_name(&self) -> &'static str {
            "Counter"
        }

        fn unit_task(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after.is_some_and(|limit| tick > limit) {
                return Err(UnitError::Publish {
                    id: id.to_string(),
                    class: "Counter",
                    source: qbrain_store::StoreError::Rejected {
                        key: UnitField::Output.key(id),
                    },
                });
            }
            store.set(&UnitField::Output.key(id), &tick.to_string())?;
            Ok(())
        }

        fn clean_store(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
            store.delete(&UnitField::Output.key(id))?;
            Ok(())
        }
    }

    /// Task whose every tick takes 200 ms and records how many ran at once.
    #[derive(Default)]
    struct Slow {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl UnitTask for Slow {
        fn class_name(&self) -> &'static str {
            "Slow"
        }

        fn unit_task(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            let written = store.set(&UnitField::Output.key(id), "done");
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            written?;
            Ok(())
        }

        fn clean_store(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
            store.delete(&UnitField::Output.key(id))?;
            Ok(())
        }
    }

    fn slow_unit() -> (Arc<BaseUnit<Slow>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let identity = UnitIdentity::new("slow", 0.01).unwrap();
        let unit = BaseUnit::from_parts(identity, Slow::default(), store.clone());
        (Arc::new(unit), store)
    }

    async fn wait_until_mid_tick(unit: &BaseUnit<Slow>) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while unit.task().in_flight.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "loop never ticked");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Start the unit, wait for a tick to be in progress, then stop it in the background.
    async fn stop_mid_tick(unit: &Arc<BaseUnit<Slow>>) -> JoinHandle<Result<()>> {
        unit.start().unwrap();
        wait_until_mid_tick(unit).await;
        let stopping = tokio::spawn({
            let unit = Arc::clone(unit);
            async move { unit.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopping
    }

    fn unit(counter: Counter) -> (BaseUnit<Counter>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let identity = UnitIdentity::new("counter", 0.01).unwrap();
        (BaseUnit::from_parts(identity, counter, store.clone()), store)
    }

    async fn wait_for_ticks(unit: &BaseUnit<Counter>, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while unit.task().ticks.load(Ordering::SeqCst) < n {
            assert!(tokio::time::Instant::now() < deadline, "loop never ticked");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_registers_class_and_ticks() {
        let (unit, store) = unit(Counter::default());
        unit.start().unwrap();
        assert!(unit.is_running());
        assert_eq!(
            store.get(&format!("{} class", unit.id())).unwrap().as_deref(),
            Some("Counter")
        );
        wait_for_ticks(&unit, 3).await;
        unit.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_leaves_no_keys_and_no_ticks() {
        let (unit, store) = unit(Counter::default());
        unit.start().unwrap();
        wait_for_ticks(&unit, 2).await;
        unit.stop().await.unwrap();

        assert!(!unit.is_running());
        assert!(store.scan_prefix(unit.id()).unwrap().is_empty());

        let ticks = unit.task().ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(unit.task().ticks.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_double_start_is_noop() {
        let (unit, _store) = unit(Counter::default());
        unit.start().unwrap();
        unit.start().unwrap();
        assert!(unit.is_running());
        unit.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_double_stop_only_warns() {
        let (unit, store) = unit(Counter::default());
        unit.start().unwrap();
        wait_for_ticks(&unit, 1).await;
        unit.stop().await.unwrap();
        let after_first = store.status().unwrap();

        unit.stop().await.unwrap();
        assert_eq!(store.status().unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_stop_before_start_only_warns() {
        let (unit, store) = unit(Counter::default());
        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_start_without_runtime() {
        let (unit, store) = unit(Counter::default());
        assert!(matches!(unit.start(), Err(UnitError::NoRuntime { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_task_ends_loop_and_stop_cleans() {
        let (unit, store) = unit(Counter {
            fail_after: Some(2),
            ..Counter::default()
        });
        unit.start().unwrap();
        wait_for_ticks(&unit, 3).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while unit.is_running() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // last good value stays visible to consumers until stop
        assert_eq!(
            store.get(&format!("{} output", unit.id())).unwrap().as_deref(),
            Some("2")
        );

        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_refused_while_running() {
        let (unit, _store) = unit(Counter::default());
        unit.tick().unwrap();
        unit.start().unwrap();
        assert!(matches!(unit.tick(), Err(UnitError::Busy { .. })));
        unit.stop().await.unwrap();
        unit.tick().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_after_stop() {
        let (unit, store) = unit(Counter::default());
        unit.start().unwrap();
        unit.stop().await.unwrap();
        unit.start().unwrap();
        assert!(unit.is_running());
        assert!(store.get(&format!("{} class", unit.id())).unwrap().is_some());
        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_refused_while_stopping() {
        let (unit, store) = slow_unit();
        let stopping = stop_mid_tick(&unit).await;

        assert!(unit.is_running());
        assert!(matches!(unit.tick(), Err(UnitError::Stopping { .. })));

        stopping.await.unwrap().unwrap();
        assert_eq!(unit.task().max_in_flight.load(Ordering::SeqCst), 1);
        assert!(!unit.is_running());
        assert!(store.is_empty(), "{:?}", store.status());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_refused_while_stopping() {
        let (unit, store) = slow_unit();
        let stopping = stop_mid_tick(&unit).await;

        assert!(matches!(unit.start(), Err(UnitError::Stopping { .. })));

        stopping.await.unwrap().unwrap();
        assert!(!unit.is_running());
        assert!(store.is_empty(), "{:?}", store.status());

        // once stopped, the unit can be started and registered again
        unit.start().unwrap();
        assert_eq!(
            store.get(&format!("{} class", unit.id())).unwrap().as_deref(),
            Some("Slow")
        );
        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_stop_waits_for_cleanup() {
        let (unit, store) = slow_unit();
        let first = stop_mid_tick(&unit).await;

        // the second caller returns only once the first has cleaned up
        unit.stop().await.unwrap();
        assert!(store.is_empty(), "{:?}", store.status());
        first.await.unwrap().unwrap();
        assert_eq!(unit.task().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_tick_leaves_runtime_free() {
        // single-threaded runtime: a tick on the worker thread would starve this timer
        let (unit, store) = slow_unit();
        unit.start().unwrap();
        wait_until_mid_tick(&unit).await;

        let before = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(before.elapsed() < Duration::from_millis(150), "{:?}", before.elapsed());

        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }
}
