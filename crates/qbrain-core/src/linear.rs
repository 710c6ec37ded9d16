use std::f64::consts::FRAC_PI_2;

use crate::angular::AngularModel;
use crate::model::Model;
use crate::register::QubitRegister;
use crate::validate::Result;

/// [`AngularModel`] with an encoding corrected so that, for `tau = 1`, the
/// probability of decoding |1⟩ equals the encoded input.
///
/// For `tau > 1` the correction only holds while the input is constant over
/// the window; time-varying sequences decode as non-linearly as the angular
/// model does.
#[derive(Debug)]
pub struct LinearModel {
    inner: AngularModel,
}

impl LinearModel {
    pub fn new(n: usize, tau: usize) -> Result<Self> {
        Ok(Self {
            inner: AngularModel::new(n, tau)?,
        })
    }

    pub fn with_seed(n: usize, tau: usize, seed: u64) -> Result<Self> {
        Ok(Self {
            inner: AngularModel::with_seed(n, tau, seed)?,
        })
    }

    pub fn register(&self) -> &QubitRegister {
        self.inner.register()
    }
}

impl Model for LinearModel {
    fn name(&self) -> &'static str {
        "LinearModel"
    }

    fn n(&self) -> usize {
        self.inner.n()
    }

    fn tau(&self) -> usize {
        self.inner.tau()
    }

    fn clear(&mut self) {
        self.inner.clear()
    }

    fn encode(&mut self, scalar_input: f64, dim: usize) -> Result<f64> {
        self.inner.rotate(scalar_input, dim, |x, tau| {
            ((2.0 * x - 1.0).asin() + FRAC_PI_2) / tau as f64
        })
    }

    fn query(&mut self, target: &[f64]) -> Result<()> {
        self.inner.query(target)
    }

    fn decode(&mut self) -> String {
        self.inner.decode()
    }
}
