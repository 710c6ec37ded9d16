use std::f64::consts::PI;
use std::fmt;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::model::Model;
use crate::register::QubitRegister;
use crate::validate::{Result, check_dim_index, check_positive, check_scalar_input, check_target_slice};

/// Encodes perceptual information in the angle of each qubit's Bloch vector.
///
/// Each sample rotates qubit `dim` by `π·x/τ`, so a window of `τ` identical
/// samples `x` lands at angle `π·x`. Decoding is a single measurement shot.
pub struct AngularModel {
    n: usize,
    tau: usize,
    register: QubitRegister,
    rng: SmallRng,
}

impl AngularModel {
    pub fn new(n: usize, tau: usize) -> Result<Self> {
        Self::with_rng(n, tau, SmallRng::from_os_rng())
    }

    /// Deterministic measurement sequence, for reproducible runs.
    pub fn with_seed(n: usize, tau: usize, seed: u64) -> Result<Self> {
        Self::with_rng(n, tau, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(n: usize, tau: usize, rng: SmallRng) -> Result<Self> {
        let n = check_positive("n", n)?;
        let tau = check_positive("tau", tau)?;
        Ok(Self {
            n,
            tau,
            register: QubitRegister::new(n),
            rng,
        })
    }

    pub fn register(&self) -> &QubitRegister {
        &self.register
    }

    /// Apply an already computed encoding rotation after validating its inputs.
    pub(crate) fn rotate(
        &mut self,
        scalar_input: f64,
        dim: usize,
        angle_of: impl FnOnce(f64, usize) -> f64,
    ) -> Result<f64> {
        let dim = check_dim_index(dim, self.n)?;
        let scalar_input = check_scalar_input(scalar_input)?;
        let angle = angle_of(scalar_input, self.tau);
        self.register.ry(dim, angle);
        Ok(angle)
    }
}

impl fmt::Debug for AngularModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AngularModel")
            .field("n", &self.n)
            .field("tau", &self.tau)
            .finish()
    }
}

impl Model for AngularModel {
    fn name(&self) -> &'static str {
        "AngularModel"
    }

    fn n(&self) -> usize {
        self.n
    }

    fn tau(&self) -> usize {
        self.tau
    }

    fn clear(&mut self) {
        self.register.reset();
    }

    fn encode(&mut self, scalar_input: f64, dim: usize) -> Result<f64> {
        self.rotate(scalar_input, dim, |x, tau| PI * x / tau as f64)
    }

    fn query(&mut self, target: &[f64]) -> Result<()> {
        check_target_slice(target, self.n)?;
        for (qubit, &t) in target.iter().enumerate() {
            self.register.ry(qubit, -PI * t);
        }
        Ok(())
    }

    fn decode(&mut self) -> String {
        self.register.measure(&mut self.rng)
    }
}
