use autograd::{Graph, Parameter, Result, VectorDataset};
use log::debug;
use ndarray::ArrayView2;
use rand::Rng;

/// A binary linear classifier over `dimensions`-wide points, with labels
/// +1 and -1.
pub struct PerceptronModel {
    w: Parameter,
}

impl PerceptronModel {
    pub fn new(dimensions: usize, rng: &mut impl Rng) -> Self {
        Self { w: Parameter::new(1, dimensions, rng) }
    }

    /// The current weight row.
    pub fn weights(&self) -> &Parameter {
        &self.w
    }

    /// Score of a single `1 x dimensions` point.
    pub fn run(&self, x: ArrayView2<f32>) -> Result<f32> {
        let mut graph = Graph::new();
        let w = graph.parameter(&self.w);
        let x = graph.input(x);
        let score = graph.dot_product(x, w)?;
        graph.as_scalar(score)
    }

    /// +1 when the score is at least zero, -1 otherwise.
    pub fn predict(&self, x: ArrayView2<f32>) -> Result<i8> {
        Ok(if self.run(x)? >= 0.0 { 1 } else { -1 })
    }

    /// One full pass over the dataset in batches of one, nudging the
    /// weights by `label * x` for every misclassified point. Returns the
    /// number of mistakes.
    pub fn pass(&mut self, data: &VectorDataset) -> Result<usize> {
        let mut mistakes = 0;
        for (x, y) in data.iterate_once(1) {
            let label = y[[0, 0]];
            if f32::from(self.predict(x)?) != label {
                mistakes += 1;
                self.w.update(x, label);
            }
        }
        Ok(mistakes)
    }

    /// Repeats passes until one is mistake-free.
    ///
    /// Terminates only when the data is linearly separable; on anything
    /// else the loop runs forever. That is the classical perceptron
    /// guarantee, not a defect.
    pub fn train(&mut self, data: &VectorDataset) -> Result<()> {
        loop {
            let mistakes = self.pass(data)?;
            debug!("perceptron pass finished with {mistakes} mistakes");
            if mistakes == 0 {
                return Ok(());
            }
        }
    }
}
