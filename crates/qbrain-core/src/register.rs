use rand::Rng;

/// An `n`-qubit register that only ever receives `RY` rotations.
///
/// Rotations about the same axis compose additively and never entangle, so the
/// register stays a product state: qubit `i` is `cos(θᵢ/2)|0⟩ + sin(θᵢ/2)|1⟩`
/// and one accumulated angle per qubit is the whole state.
#[derive(Clone, Debug, PartialEq)]
pub struct QubitRegister {
    angles: Vec<f64>,
}

impl QubitRegister {
    /// All qubits in |0⟩.
    pub fn new(n: usize) -> Self {
        Self {
            angles: vec![0.0; n],
        }
    }

    pub fn n(&self) -> usize {
        self.angles.len()
    }

    /// Apply `RY(angle)` to qubit `qubit`. Caller guarantees the index is valid.
    pub fn ry(&mut self, qubit: usize, angle: f64) {
        self.angles[qubit] += angle;
    }

    /// Reset every qubit to |0⟩.
    pub fn reset(&mut self) {
        self.angles.iter_mut().for_each(|a| *a = 0.0);
    }

    pub fn angle(&self, qubit: usize) -> f64 {
        self.angles[qubit]
    }

    /// Probability of measuring qubit `qubit` in |1⟩: sin²(θ/2).
    pub fn probability_one(&self, qubit: usize) -> f64 {
        let half = self.angles[qubit] / 2.0;
        (half.sin() * half.sin()).clamp(0.0, 1.0)
    }

    /// One measurement shot of every qubit.
    ///
    /// The label lists qubit `n-1` first and qubit `0` last, so `"01"` means
    /// qubit 0 collapsed to |1⟩.
    pub fn measure<R: Rng>(&self, rng: &mut R) -> String {
        (0..self.n())
            .rev()
            .map(|qubit| {
                if rng.random::<f64>() < self.probability_one(qubit) {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }
}
