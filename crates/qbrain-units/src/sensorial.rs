use std::sync::atomic::{AtomicU64, Ordering};

use qbrain_core::{UnitField, ValidationError, check_scalar_input, format_output};
use qbrain_store::{KeyValueStore, SharedStore};

use crate::error::{Result, UnitError};
use crate::identity::UnitIdentity;
use crate::unit::{BaseUnit, UnitTask};

/// A unit with no upstream dependency: republishes one externally set
/// scalar reading every period.
pub type SensorialUnit = BaseUnit<SensorialState>;

/// The reading lives in one atomic cell (the `f64` bit pattern), so the loop
/// never observes a torn value while an outside caller updates it.
#[derive(Debug)]
pub struct SensorialState {
    reading: AtomicU64,
}

impl SensorialState {
    fn new(initial: f64) -> Self {
        Self {
            reading: AtomicU64::new(initial.to_bits()),
        }
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.reading.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.reading.store(value.to_bits(), Ordering::Release);
    }
}

impl UnitTask for SensorialState {
    fn class_name(&self) -> &'static str {
        "SensorialUnit"
    }

    fn unit_task(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
        let reading = self.load();
        tracing::debug!("scalar_reading={reading}");
        store
            .set(&UnitField::Output.key(id), &format_output(reading))
            .map_err(|source| UnitError::Publish {
                id: id.to_string(),
                class: self.class_name(),
                source,
            })
    }

    fn clean_store(&self, id: &str, store: &dyn KeyValueStore) -> Result<()> {
        store.delete(&UnitField::Output.key(id))?;
        Ok(())
    }
}

impl BaseUnit<SensorialState> {
    /// New sensor reading 0.0 until told otherwise.
    pub fn new(name: &str, period_secs: f64, store: SharedStore) -> Result<Self> {
        Self::with_reading(name, period_secs, 0.0, store)
    }

    /// New sensor with an initial reading in `[0, 1]`.
    pub fn with_reading(
        name: &str,
        period_secs: f64,
        initial: f64,
        store: SharedStore,
    ) -> Result<Self> {
        let identity = UnitIdentity::new(name, period_secs)?;
        let initial = check_scalar_input(initial)?;
        Ok(Self::from_parts(identity, SensorialState::new(initial), store))
    }

    pub fn scalar_reading(&self) -> f64 {
        self.task().load()
    }

    /// Replace the reading. Safe to call while the loop runs; the next tick
    /// publishes the new value.
    pub fn set_scalar_reading(&self, value: f64) -> std::result::Result<(), ValidationError> {
        let value = check_scalar_input(value)?;
        tracing::debug!(
            unit = %self.id(),
            "changing scalar reading from {} to {value}",
            self.scalar_reading()
        );
        self.task().store(value);
        Ok(())
    }
}
