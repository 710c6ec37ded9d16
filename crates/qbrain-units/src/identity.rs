use std::time::Duration;

use qbrain_core::{ValidationError, check_period};
use uuid::Uuid;

/// Length of the random suffix appended to a unit name to form its id.
const ID_SUFFIX_LEN: usize = 6;

/// Name, unique id and period of a unit. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitIdentity {
    id: String,
    name: String,
    period: Duration,
}

impl UnitIdentity {
    /// Validate `period_secs` and derive a fresh id `"<name>-<6 hex chars>"`.
    pub fn new(name: &str, period_secs: f64) -> Result<Self, ValidationError> {
        let period = check_period(period_secs)?;
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(Self {
            id: format!("{name}-{}", &suffix[..ID_SUFFIX_LEN]),
            name: name.to_string(),
            period,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
