use crate::validate::Result;

/// Perceptual model capability driven by a unit's temporal window.
///
/// A window is `tau` rounds of [`encode`](Model::encode) over every dimension,
/// then one [`query`](Model::query) and one [`decode`](Model::decode).
/// [`clear`](Model::clear) starts the next window from scratch.
pub trait Model: Send {
    /// Short type name, used in logs and unit descriptions.
    fn name(&self) -> &'static str;

    /// Number of input dimensions (qubits).
    fn n(&self) -> usize;

    /// Number of samples in one temporal window.
    fn tau(&self) -> usize;

    fn clear(&mut self);

    /// Encode `scalar_input` into dimension `dim`. Returns the rotation applied.
    fn encode(&mut self, scalar_input: f64, dim: usize) -> Result<f64>;

    /// Rotate the basis so that `target` becomes the all-zeros state.
    fn query(&mut self, target: &[f64]) -> Result<()>;

    /// Collapse the model into a basis-state label such as `"010"`.
    fn decode(&mut self) -> String;
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn n(&self) -> usize {
        (**self).n()
    }

    fn tau(&self) -> usize {
        (**self).tau()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn encode(&mut self, scalar_input: f64, dim: usize) -> Result<f64> {
        (**self).encode(scalar_input, dim)
    }

    fn query(&mut self, target: &[f64]) -> Result<()> {
        (**self).query(target)
    }

    fn decode(&mut self) -> String {
        (**self).decode()
    }
}
