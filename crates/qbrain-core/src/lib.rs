//! Perception-side building blocks for qbrain units.
//!
//! A unit encodes scalar readings into a [`Model`] over a temporal window,
//! queries it against a target vector, decodes a basis-state label and
//! summarises that label with a [`Burst`]. This crate holds those
//! capabilities, the validators every mutation goes through, the shared-state
//! key schema and the topology that can be rebuilt from a store snapshot.
//!
//! Zero I/O: no store, no runtime, no scheduling.

pub mod angular;
pub mod burst;
pub mod constants;
pub mod keys;
pub mod linear;
pub mod model;
pub mod register;
pub mod topology;
pub mod validate;

pub use angular::AngularModel;
pub use burst::{Burst, OneBurst, ZeroBurst};
pub use constants::{MIN_PERIOD_SECS, UNIT_MAX, UNIT_MIN};
pub use keys::{UnitField, format_output, parse_key};
pub use linear::LinearModel;
pub use model::Model;
pub use register::QubitRegister;
pub use topology::{Edge, Node, Topology};
pub use validate::{
    Result, TargetVector, ValidationError, ValidationKind, check_dim_index, check_period,
    check_positive, check_scalar_input, check_target_slice, check_target_vector, parse_scalar,
};
