use ndarray::{Array2, ArrayView2};
use rand::Rng;

/// A trainable matrix of weights.
///
/// The shape is fixed at construction and never changes; training mutates
/// the values in place through [`Parameter::update`].
#[derive(Debug, Clone)]
pub struct Parameter {
    value: Array2<f32>,
}

impl Parameter {
    /// Creates a `rows` x `cols` parameter with uniform values in
    /// `±sqrt(6 / (rows + cols))`, so gradients can flow through
    /// rectified units from the first step.
    ///
    /// # Panics
    /// If `rows` or `cols` is zero.
    pub fn new(rows: usize, cols: usize, rng: &mut impl Rng) -> Self {
        assert!(rows > 0 && cols > 0, "parameters must have a non-empty shape");

        let limit = (6.0 / (rows + cols) as f32).sqrt();
        let value = Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit));
        Self { value }
    }

    /// Wraps an existing matrix, for deterministic construction.
    ///
    /// # Panics
    /// If `value` has an empty dimension.
    pub fn from_array(value: Array2<f32>) -> Self {
        assert!(
            value.nrows() > 0 && value.ncols() > 0,
            "parameters must have a non-empty shape"
        );
        Self { value }
    }

    pub fn value(&self) -> ArrayView2<'_, f32> {
        self.value.view()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    /// In-place `value += multiplier * direction`. Linear in the
    /// multiplier: stepping by `a` and then by `b` along the same
    /// direction equals one step by `a + b`.
    pub fn update(&mut self, direction: ArrayView2<f32>, multiplier: f32) {
        self.value.scaled_add(multiplier, &direction);
    }
}
