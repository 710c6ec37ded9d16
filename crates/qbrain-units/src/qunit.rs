use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use qbrain_core::{
    Burst, Model, TargetVector, UnitField, ValidationError, check_dim_index, check_positive,
    check_scalar_input, check_target_vector, format_output, parse_scalar,
};
use qbrain_store::{KeyValueStore, SharedStore};

use crate::error::{Result, UnitError};
use crate::identity::UnitIdentity;
use crate::unit::{BaseUnit, UnitTask};

/// A unit running the temporal-window cycle over a perceptual model.
///
/// Every tick encodes one input vector. After `tau` ticks the window closes:
/// the model is queried and decoded, the burst of the decoded state is
/// published together with the state, query and wiring, and a fresh window
/// starts with a cleared model.
pub type QUnit = BaseUnit<QUnitState>;

/// Per-unit state shared between the background loop and outside callers.
///
/// `query` and `in_qunits` are replaced under their own lock, so a reader
/// sees either the old or the new value, never a mix. The model is touched
/// only by ticks.
pub struct QUnitState {
    n: usize,
    tau: usize,
    model: Mutex<Box<dyn Model>>,
    burst: Box<dyn Burst>,
    default_input: Vec<f64>,
    query: RwLock<Vec<f64>>,
    in_qunits: RwLock<BTreeMap<usize, String>>,
    window_index: AtomicUsize,
    windows: AtomicU64,
}

impl QUnitState {
    fn query(&self) -> Vec<f64> {
        self.query.read().clone()
    }

    fn in_qunits(&self) -> BTreeMap<usize, Option<String>> {
        let wired = self.in_qunits.read();
        (0..self.n).map(|dim| (dim, wired.get(&dim).cloned())).collect()
    }

    /// Default input overlaid with every wired producer's latest output.
    fn input_vector(&self, store: &dyn KeyValueStore) -> Result<Vec<f64>> {
        let mut input = self.default_input.clone();
        let wired = self.in_qunits.read().clone();
        for (dim, producer) in wired {
            let Some(raw) = store.get(&UnitField::Output.key(&producer))? else {
                tracing::info!("unable to read {producer} output, using default for dim {dim}");
                continue;
            };
            match parse_scalar(&raw).and_then(check_scalar_input) {
                Ok(value) => input[dim] = value,
                Err(e) => {
                    tracing::warn!("ignoring {producer} output '{raw}' for dim {dim}: {e}");
                }
            }
        }
        Ok(input)
    }

    /// Query, decode and publish the closed window.
    fn finalize(&self, id: &str, model: &mut dyn Model, store: &dyn KeyValueStore) -> Result<()> {
        let query = self.query();
        tracing::debug!("querying for state {query:?}");
        model.query(&query)?;
        let state = model.decode();
        let output = self.burst.burst(&state);
        tracing::debug!("output state = {state}, burst = {output}");

        let output = format_output(output);
        let query = serde_json::to_string(&query)?;
        let in_qunits = serde_json::to_string(&self.in_qunits())?;
        let output_key = UnitField::Output.key(id);
        let state_key = UnitField::State.key(id);
        let query_key = UnitField::Query.key(id);
        let in_qunits_key = UnitField::InQunits.key(id);

        store
            .set_many(&[
                (output_key.as_str(), output.as_str()),
                (state_key.as_str(), state.as_str()),
                (query_key.as_str(), query.as_str()),
                (in_qunits_key.as_str(), in_qunits.as_str()),
            ])
            .map_err(|source| UnitError::Publish {
                id: id.to_string(),
                class: self.class_name(),
                source,
            })
    }
}

impl UnitTask for QUnitState {
    fn class_name(&self) -> &'static str {
        "QUnit"
    }

    fn unit_task(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
        let input = self.input_vector(store)?;
        tracing::debug!("input_vector={input:?}");

        // the window position belongs to whoever holds the model
        let mut model = self.model.lock();
        let index = self.window_index.load(Ordering::Acquire);
        tracing::debug!("temporal window event {}/{}", index + 1, self.tau);
        for (dim, &value) in input.iter().enumerate() {
            model.encode(value, dim)?;
        }

        let next = index + 1;
        if next < self.tau {
            self.window_index.store(next, Ordering::Release);
            return Ok(());
        }

        // The window is over whether or not publishing succeeds: a failed
        // window is dropped rather than re-encoded into an over-long one.
        let published = self.finalize(id, model.as_mut(), store);
        tracing::debug!("initializing a new temporal window");
        model.clear();
        self.window_index.store(0, Ordering::Release);
        if published.is_ok() {
            self.windows.fetch_add(1, Ordering::AcqRel);
        }
        published
    }

    fn clean_store(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
        for field in [
            UnitField::Output,
            UnitField::State,
            UnitField::Query,
            UnitField::InQunits,
        ] {
            store.delete(&field.key(id))?;
        }
        Ok(())
    }
}

/// Validating builder for [`QUnit`].
pub struct QUnitBuilder {
    name: String,
    period_secs: f64,
    model: Box<dyn Model>,
    burst: Box<dyn Burst>,
    query: Option<TargetVector>,
    default_input: Option<Vec<f64>>,
    in_qunits: BTreeMap<usize, String>,
}

impl QUnitBuilder {
    /// Query target; all zeros when unset.
    pub fn query(mut self, query: impl Into<TargetVector>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Per-dimension fallback input; all zeros when unset.
    pub fn default_input(mut self, default_input: Vec<f64>) -> Self {
        self.default_input = Some(default_input);
        self
    }

    /// Read dimension `dim` from `producer_id`'s output.
    pub fn input(mut self, dim: usize, producer_id: impl Into<String>) -> Self {
        self.in_qunits.insert(dim, producer_id.into());
        self
    }

    pub fn build(self, store: SharedStore) -> Result<QUnit> {
        let identity = UnitIdentity::new(&self.name, self.period_secs)?;
        let n = check_positive("n", self.model.n())?;
        let tau = check_positive("tau", self.model.tau())?;

        let query = check_target_vector(self.query.unwrap_or(TargetVector::Vector(vec![0.0; n])), n)?;
        let default_input = check_target_vector(self.default_input.unwrap_or_else(|| vec![0.0; n]), n)?;
        for &dim in self.in_qunits.keys() {
            check_dim_index(dim, n)?;
        }

        let state = QUnitState {
            n,
            tau,
            model: Mutex::new(self.model),
            burst: self.burst,
            default_input,
            query: RwLock::new(query),
            in_qunits: RwLock::new(self.in_qunits),
            window_index: AtomicUsize::new(0),
            windows: AtomicU64::new(0),
        };
        let unit = QUnit::from_parts(identity, state, store);
        tracing::debug!(unit = %unit.id(), "properties: {unit:?}");
        Ok(unit)
    }
}

impl BaseUnit<QUnitState> {
    pub fn builder(
        name: &str,
        model: impl Model + 'static,
        burst: impl Burst + 'static,
        period_secs: f64,
    ) -> QUnitBuilder {
        QUnitBuilder {
            name: name.to_string(),
            period_secs,
            model: Box::new(model),
            burst: Box::new(burst),
            query: None,
            default_input: None,
            in_qunits: BTreeMap::new(),
        }
    }

    /// Model dimension.
    pub fn n(&self) -> usize {
        self.task().n
    }

    /// Window length in ticks.
    pub fn tau(&self) -> usize {
        self.task().tau
    }

    pub fn model_name(&self) -> &'static str {
        self.task().model.lock().name()
    }

    /// Position inside the current window, always in `[0, tau)`.
    pub fn window_index(&self) -> usize {
        self.task().window_index.load(Ordering::Acquire)
    }

    /// Number of windows published since construction.
    pub fn windows_published(&self) -> u64 {
        self.task().windows.load(Ordering::Acquire)
    }

    pub fn default_input(&self) -> &[f64] {
        &self.task().default_input
    }

    /// Snapshot copy of the query vector.
    pub fn query(&self) -> Vec<f64> {
        self.task().query()
    }

    /// Validate and replace the query vector. Takes effect at the next window close.
    pub fn set_query(
        &self,
        query: impl Into<TargetVector>,
    ) -> std::result::Result<(), ValidationError> {
        let query = check_target_vector(query, self.n())?;
        let mut current = self.task().query.write();
        tracing::debug!(unit = %self.id(), "changing query from {:?} to {query:?}", *current);
        *current = query;
        Ok(())
    }

    /// Dense wiring map: every dimension, `None` where the default input is used.
    pub fn in_qunits(&self) -> BTreeMap<usize, Option<String>> {
        self.task().in_qunits()
    }

    /// Wire dimension `dim` to `producer_id`'s output.
    pub fn set_input(
        &self,
        dim: usize,
        producer_id: impl Into<String>,
    ) -> std::result::Result<(), ValidationError> {
        let dim = check_dim_index(dim, self.n())?;
        let producer_id = producer_id.into();
        let previous = self.task().in_qunits.write().insert(dim, producer_id.clone());
        tracing::debug!(
            unit = %self.id(),
            "changing dim {dim} input from {previous:?} to {producer_id}"
        );
        Ok(())
    }

    /// Unwire dimension `dim`, falling back to its default input.
    pub fn clear_input(&self, dim: usize) -> std::result::Result<(), ValidationError> {
        let dim = check_dim_index(dim, self.n())?;
        self.task().in_qunits.write().remove(&dim);
        Ok(())
    }

    /// The input vector the next tick would encode, read from the store now.
    pub fn input_vector(&self) -> Result<Vec<f64>> {
        self.task().input_vector(self.store().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbrain_core::{AngularModel, OneBurst, ValidationKind, ZeroBurst};
    use qbrain_store::MemoryStore;
    use std::sync::Arc;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn qunit(n: usize, tau: usize, store: &Arc<MemoryStore>) -> QUnit {
        QUnit::builder("q", AngularModel::with_seed(n, tau, 42).unwrap(), ZeroBurst, 0.1)
            .build(store.clone())
            .unwrap()
    }

    #[test]
    fn test_fresh_qunit() {
        let store = store();
        let unit = qunit(3, 4, &store);
        assert_eq!(unit.window_index(), 0);
        assert_eq!(unit.n(), 3);
        assert_eq!(unit.tau(), 4);
        assert_eq!(unit.query(), vec![0.0; 3]);
        assert_eq!(unit.default_input(), &[0.0; 3]);
        assert_eq!(unit.model_name(), "AngularModel");
        assert_eq!(unit.class_name(), "QUnit");
        assert!(unit.in_qunits().values().all(Option::is_none));
        assert!(store.is_empty());
    }

    #[test]
    fn test_builder_validation() {
        let store = store();
        let model = || AngularModel::with_seed(2, 1, 1).unwrap();

        let err = QUnit::builder("q", model(), ZeroBurst, 0.001)
            .build(store.clone())
            .unwrap_err();
        assert!(matches!(err, UnitError::Validation(ref v) if v.kind() == ValidationKind::Range));

        let err = QUnit::builder("q", model(), ZeroBurst, 0.1)
            .query([0.5])
            .build(store.clone())
            .unwrap_err();
        assert!(matches!(err, UnitError::Validation(ValidationError::LengthMismatch { .. })));

        let err = QUnit::builder("q", model(), ZeroBurst, 0.1)
            .default_input(vec![0.2, 3.0])
            .build(store.clone())
            .unwrap_err();
        assert!(matches!(err, UnitError::Validation(ref v) if v.kind() == ValidationKind::Range));

        let err = QUnit::builder("q", model(), ZeroBurst, 0.1)
            .input(2, "other-000000")
            .build(store.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            UnitError::Validation(ValidationError::IndexOutOfRange { dim: 2, n: 2 })
        ));
    }

    #[test]
    fn test_window_publishes_once_after_tau_ticks() {
        let store = store();
        let unit = qunit(2, 3, &store);
        let output_key = format!("{} output", unit.id());

        unit.tick().unwrap();
        unit.tick().unwrap();
        assert_eq!(unit.window_index(), 2);
        assert_eq!(unit.windows_published(), 0);
        assert!(store.get(&output_key).unwrap().is_none());

        unit.tick().unwrap();
        assert_eq!(unit.window_index(), 0);
        assert_eq!(unit.windows_published(), 1);
        // zero input, zero query: the register never leaves |00>
        assert_eq!(store.get(&output_key).unwrap().as_deref(), Some("1.0"));
        assert_eq!(
            store.get(&format!("{} state", unit.id())).unwrap().as_deref(),
            Some("00")
        );
        assert_eq!(
            store.get(&format!("{} query", unit.id())).unwrap().as_deref(),
            Some("[0.0,0.0]")
        );
        assert_eq!(
            store.get(&format!("{} in_qunits", unit.id())).unwrap().as_deref(),
            Some(r#"{"0":null,"1":null}"#)
        );
    }

    #[test]
    fn test_window_index_cycles() {
        let store = store();
        let unit = qunit(1, 4, &store);
        for tick in 1..=12 {
            unit.tick().unwrap();
            assert_eq!(unit.window_index(), tick % 4);
            assert!(unit.window_index() < unit.tau());
        }
        assert_eq!(unit.windows_published(), 3);
    }

    #[test]
    fn test_tau_one_publishes_every_tick() {
        let store = store();
        let unit = qunit(1, 1, &store);
        for expected in 1..=5 {
            unit.tick().unwrap();
            assert_eq!(unit.window_index(), 0);
            assert_eq!(unit.windows_published(), expected);
        }
    }

    #[test]
    fn test_wired_input_read_from_store() {
        let store = store();
        let unit = qunit(2, 1, &store);
        unit.set_input(0, "A-abcdef").unwrap();

        // producer not publishing yet
        assert_eq!(unit.input_vector().unwrap(), vec![0.0, 0.0]);

        store.set("A-abcdef output", "0.42").unwrap();
        assert_eq!(unit.input_vector().unwrap(), vec![0.42, 0.0]);
    }

    #[test]
    fn test_default_input_not_overwritten_by_reads() {
        let store = store();
        let unit = QUnit::builder("q", AngularModel::with_seed(1, 1, 1).unwrap(), ZeroBurst, 0.1)
            .default_input(vec![0.3])
            .input(0, "A-abcdef")
            .build(store.clone())
            .unwrap();

        store.set("A-abcdef output", "0.9").unwrap();
        assert_eq!(unit.input_vector().unwrap(), vec![0.9]);

        store.delete("A-abcdef output").unwrap();
        assert_eq!(unit.input_vector().unwrap(), vec![0.3]);
        assert_eq!(unit.default_input(), &[0.3]);
    }

    #[test]
    fn test_malformed_producer_output_falls_back() {
        let store = store();
        let unit = QUnit::builder("q", AngularModel::with_seed(2, 1, 1).unwrap(), ZeroBurst, 0.1)
            .default_input(vec![0.1, 0.2])
            .input(0, "A-abcdef")
            .input(1, "B-abcdef")
            .build(store.clone())
            .unwrap();
        store.set("A-abcdef output", "garbage").unwrap();
        store.set("B-abcdef output", "7.5").unwrap();
        assert_eq!(unit.input_vector().unwrap(), vec![0.1, 0.2]);
        unit.tick().unwrap();
    }

    #[test]
    fn test_set_input_validates_dim() {
        let store = store();
        let unit = qunit(2, 1, &store);
        assert!(unit.set_input(1, "x-000000").is_ok());
        assert_eq!(
            unit.set_input(2, "x-000000").unwrap_err(),
            ValidationError::IndexOutOfRange { dim: 2, n: 2 }
        );
        let wiring = unit.in_qunits();
        assert_eq!(wiring.len(), 2);
        assert_eq!(wiring[&0], None);
        assert_eq!(wiring[&1].as_deref(), Some("x-000000"));

        unit.clear_input(1).unwrap();
        assert!(unit.in_qunits()[&1].is_none());
        assert!(unit.clear_input(5).is_err());
    }

    #[test]
    fn test_set_query() {
        let store = store();
        let unit = qunit(2, 1, &store);
        unit.set_query([0.0, 1.0]).unwrap();
        assert_eq!(unit.query(), vec![0.0, 1.0]);

        assert_eq!(
            unit.set_query([0.5, 1.5]).unwrap_err().kind(),
            ValidationKind::Range
        );
        assert_eq!(
            unit.set_query(0.5).unwrap_err().kind(),
            ValidationKind::Length
        );
        assert_eq!(unit.query(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_query_flips_published_state() {
        let store = store();
        let unit = QUnit::builder("q", AngularModel::with_seed(1, 1, 1).unwrap(), OneBurst, 0.1)
            .query(1.0)
            .build(store.clone())
            .unwrap();
        // zero input queried against 1.0 rotates by -π: decodes |1>
        unit.tick().unwrap();
        assert_eq!(
            store.get(&format!("{} state", unit.id())).unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            store.get(&format!("{} output", unit.id())).unwrap().as_deref(),
            Some("1.0")
        );
    }

    #[test]
    fn test_window_count_exact_under_parallel_ticks() {
        let store = store();
        let unit = qunit(1, 2, &store);
        let task = unit.task();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        task.unit_task(unit.id(), store.as_ref()).unwrap();
                    }
                });
            }
        });
        // 100 encodes over windows of 2: every window closes exactly once
        assert_eq!(unit.windows_published(), 50);
        assert_eq!(unit.window_index(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_cleans_all_fields() {
        let store = store();
        let unit = qunit(1, 1, &store);
        unit.start().unwrap();
        let key = format!("{} output", unit.id());
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while store.get(&key).unwrap().is_none() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.scan_prefix(unit.id()).unwrap().len(), 5);

        unit.stop().await.unwrap();
        assert!(store.is_empty());
    }
}
