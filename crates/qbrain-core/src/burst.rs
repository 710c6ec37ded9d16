/// Scalar summary of a decoded basis-state label.
pub trait Burst: Send + Sync {
    fn burst(&self, state: &str) -> f64;
}

impl<F> Burst for F
where
    F: Fn(&str) -> f64 + Send + Sync,
{
    fn burst(&self, state: &str) -> f64 {
        self(state)
    }
}

/// Fraction of `'0'` digits in the label: `"00100100"` → 0.75.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroBurst;

impl Burst for ZeroBurst {
    fn burst(&self, state: &str) -> f64 {
        digit_fraction(state, '0')
    }
}

/// Fraction of `'1'` digits in the label: `"00100100"` → 0.25.
#[derive(Clone, Copy, Debug, Default)]
pub struct OneBurst;

impl Burst for OneBurst {
    fn burst(&self, state: &str) -> f64 {
        digit_fraction(state, '1')
    }
}

fn digit_fraction(state: &str, digit: char) -> f64 {
    let len = state.chars().count();
    if len == 0 {
        return 0.0;
    }
    state.chars().filter(|&c| c == digit).count() as f64 / len as f64
}
