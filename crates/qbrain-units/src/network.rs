//! Declarative unit networks.
//!
//! A [`Network`] owns every unit it builds; there is no process-wide registry.
//! Inputs are declared by unit *name* and resolved to ids once all units exist,
//! after which the only coupling left is the shared store.

use std::collections::{BTreeMap, HashMap};

use qbrain_core::{
    AngularModel, Burst, LinearModel, Model, OneBurst, TargetVector, ValidationError, ZeroBurst,
};
use qbrain_store::{SharedStore, StoreConfig};
use serde::Deserialize;

use crate::error::{Result, UnitError};
use crate::qunit::QUnit;
use crate::sensorial::SensorialUnit;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Angular,
    Linear,
}

impl ModelKind {
    fn build(self, n: usize, tau: usize, seed: Option<u64>) -> Result<Box<dyn Model>> {
        Ok(match (self, seed) {
            (ModelKind::Angular, Some(seed)) => Box::new(AngularModel::with_seed(n, tau, seed)?),
            (ModelKind::Angular, None) => Box::new(AngularModel::new(n, tau)?),
            (ModelKind::Linear, Some(seed)) => Box::new(LinearModel::with_seed(n, tau, seed)?),
            (ModelKind::Linear, None) => Box::new(LinearModel::new(n, tau)?),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BurstKind {
    #[default]
    Zero,
    One,
}

impl Burst for BurstKind {
    fn burst(&self, state: &str) -> f64 {
        match self {
            BurstKind::Zero => ZeroBurst.burst(state),
            BurstKind::One => OneBurst.burst(state),
        }
    }
}

/// `[[sensor]]` entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub period: f64,
    #[serde(default)]
    pub reading: f64,
}

/// `[[qunit]]` entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct QUnitConfig {
    pub name: String,
    pub period: f64,
    #[serde(default)]
    pub model: ModelKind,
    pub n: usize,
    pub tau: usize,
    #[serde(default)]
    pub burst: BurstKind,
    pub query: Option<TargetVector>,
    pub default_input: Option<Vec<f64>>,
    /// Dimension (as written in the file) -> producer unit name.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Fixes the measurement sequence.
    pub seed: Option<u64>,
}

/// A whole network file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default, rename = "sensor")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default, rename = "qunit")]
    pub qunits: Vec<QUnitConfig>,
}

fn parse_dim(raw: &str) -> std::result::Result<usize, ValidationError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ValidationError::NotNumeric {
            what: "input dimension",
            found: raw.to_string(),
        })
}

pub struct Network {
    store: SharedStore,
    sensors: Vec<SensorialUnit>,
    qunits: Vec<QUnit>,
    ids: HashMap<String, String>,
}

impl Network {
    /// Build every unit in `config` on `store` and wire the declared inputs.
    pub fn build(config: &NetworkConfig, store: SharedStore) -> Result<Self> {
        let mut ids: HashMap<String, String> = HashMap::new();
        let mut register = |name: &str, id: &str| -> Result<()> {
            if ids.insert(name.to_string(), id.to_string()).is_some() {
                return Err(UnitError::DuplicateName(name.to_string()));
            }
            Ok(())
        };

        let mut sensors = Vec::with_capacity(config.sensors.len());
        for sensor in &config.sensors {
            let unit = SensorialUnit::with_reading(
                &sensor.name,
                sensor.period,
                sensor.reading,
                store.clone(),
            )?;
            register(&sensor.name, unit.id())?;
            sensors.push(unit);
        }

        let mut qunits = Vec::with_capacity(config.qunits.len());
        for q in &config.qunits {
            let model = q.model.build(q.n, q.tau, q.seed)?;
            let mut builder = QUnit::builder(&q.name, model, q.burst, q.period);
            if let Some(query) = &q.query {
                builder = builder.query(query.clone());
            }
            if let Some(default_input) = &q.default_input {
                builder = builder.default_input(default_input.clone());
            }
            let unit = builder.build(store.clone())?;
            register(&q.name, unit.id())?;
            qunits.push(unit);
        }

        // every unit exists now, so inputs may point forwards or backwards
        for (q, unit) in config.qunits.iter().zip(&qunits) {
            for (dim, producer) in &q.inputs {
                let dim = parse_dim(dim)?;
                let producer_id = ids.get(producer).ok_or_else(|| UnitError::UnknownInput {
                    unit: q.name.clone(),
                    input: producer.clone(),
                })?;
                unit.set_input(dim, producer_id.clone())?;
            }
        }

        tracing::info!(
            "built network: {} sensors, {} qunits",
            sensors.len(),
            qunits.len()
        );
        Ok(Self {
            store,
            sensors,
            qunits,
            ids,
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn sensors(&self) -> &[SensorialUnit] {
        &self.sensors
    }

    pub fn qunits(&self) -> &[QUnit] {
        &self.qunits
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorialUnit> {
        self.sensors.iter().find(|u| u.name() == name)
    }

    pub fn qunit(&self, name: &str) -> Option<&QUnit> {
        self.qunits.iter().find(|u| u.name() == name)
    }

    /// Unit id for a configured name.
    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    /// Start every unit, producers without upstreams first.
    pub fn start(&self) -> Result<()> {
        for unit in &self.sensors {
            unit.start()?;
        }
        for unit in &self.qunits {
            unit.start()?;
        }
        Ok(())
    }

    /// Stop every unit, consumers first. All units are stopped even if one
    /// fails to clean up; the first error is returned.
    pub async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for unit in self.qunits.iter().rev() {
            if let Err(e) = unit.stop().await {
                tracing::error!(unit = %unit.id(), "stop failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        for unit in self.sensors.iter().rev() {
            if let Err(e) = unit.stop().await {
                tracing::error!(unit = %unit.id(), "stop failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_running(&self) -> bool {
        self.sensors.iter().any(|u| u.is_running()) || self.qunits.iter().any(|u| u.is_running())
    }
}
