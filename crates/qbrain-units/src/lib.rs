//! Periodic perception units and their lifecycle.
//!
//! Every unit runs its own loop (task, then sleep for its period) on the tokio
//! runtime and talks to other units only through the shared store: it writes
//! its own `"<id> <field>"` keys and polls the `output` keys of the producers
//! it is wired to.

pub mod error;
pub mod identity;
pub mod network;
pub mod qunit;
pub mod sensorial;
pub mod unit;

pub use error::{Result, UnitError};
pub use identity::UnitIdentity;
pub use network::{BurstKind, ModelKind, Network, NetworkConfig, QUnitConfig, SensorConfig};
pub use qunit::{QUnit, QUnitBuilder, QUnitState};
pub use sensorial::{SensorialState, SensorialUnit};
pub use unit::{BaseUnit, UnitTask};
