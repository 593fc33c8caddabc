use autograd::{Graph, NodeId, Parameter, Result, VectorDataset};
use log::debug;
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::control::BestLoss;

/// Hidden widths of the three rectified layers.
const HIDDEN: [usize; 3] = [32, 64, 32];

const BATCH_SIZE: usize = 5;
const RATE: f32 = -1e-3;
const LOSS_TARGET: f32 = 5e-5;

/// A feed-forward regressor mapping one real input to one real output:
/// three rectified hidden layers and a linear head.
pub struct RegressionModel {
    w1: Parameter,
    b1: Parameter,
    w2: Parameter,
    b2: Parameter,
    w3: Parameter,
    b3: Parameter,
    w4: Parameter,
    b4: Parameter,
}

impl RegressionModel {
    pub fn new(rng: &mut impl Rng) -> Self {
        let [h1, h2, h3] = HIDDEN;
        Self {
            w1: Parameter::new(1, h1, rng),
            b1: Parameter::new(1, h1, rng),
            w2: Parameter::new(h1, h2, rng),
            b2: Parameter::new(1, h2, rng),
            w3: Parameter::new(h2, h3, rng),
            b3: Parameter::new(1, h3, rng),
            w4: Parameter::new(h3, 1, rng),
            b4: Parameter::new(1, 1, rng),
        }
    }

    fn wire<'a>(
        &'a self,
        graph: &mut Graph<'a>,
        x: ArrayView2<'a, f32>,
    ) -> Result<(NodeId, [NodeId; 8])> {
        let w1 = graph.parameter(&self.w1);
        let b1 = graph.parameter(&self.b1);
        let w2 = graph.parameter(&self.w2);
        let b2 = graph.parameter(&self.b2);
        let w3 = graph.parameter(&self.w3);
        let b3 = graph.parameter(&self.b3);
        let w4 = graph.parameter(&self.w4);
        let b4 = graph.parameter(&self.b4);

        let mut h = graph.input(x);
        for (w, b) in [(w1, b1), (w2, b2), (w3, b3)] {
            let z = graph.linear(h, w)?;
            let z = graph.add_bias(z, b)?;
            h = graph.relu(z);
        }
        let out = graph.linear(h, w4)?;
        let out = graph.add_bias(out, b4)?;

        Ok((out, [w1, b1, w2, b2, w3, b3, w4, b4]))
    }

    fn params_mut(&mut self) -> [&mut Parameter; 8] {
        [
            &mut self.w1,
            &mut self.b1,
            &mut self.w2,
            &mut self.b2,
            &mut self.w3,
            &mut self.b3,
            &mut self.w4,
            &mut self.b4,
        ]
    }

    /// Predictions for a `n x 1` batch, as a `n x 1` matrix.
    pub fn run(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut graph = Graph::new();
        let (out, _) = self.wire(&mut graph, x)?;
        Ok(graph.value(out).to_owned())
    }

    /// Squared-error loss of the predictions against `y`.
    pub fn get_loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        let mut graph = Graph::new();
        let (pred, _) = self.wire(&mut graph, x)?;
        let y = graph.input(y);
        let loss = graph.square_loss(pred, y)?;
        graph.as_scalar(loss)
    }

    /// Gradient descent at a fixed `rate` (negative multiplier) until the
    /// best-ever observed batch loss reaches `loss_target` or the epoch
    /// cap runs out. Returns the best loss seen.
    pub fn fit(
        &mut self,
        data: &VectorDataset,
        batch_size: usize,
        rate: f32,
        loss_target: f32,
        max_epochs: Option<usize>,
    ) -> Result<f32> {
        let mut best = BestLoss::new();
        let mut epoch = 0;

        while !best.reached(loss_target) {
            if max_epochs.is_some_and(|cap| epoch >= cap) {
                break;
            }

            for (x, y) in data.iterate_once(batch_size) {
                let mut graph = Graph::new();
                let (pred, ids) = self.wire(&mut graph, x)?;
                let y = graph.input(y);
                let loss = graph.square_loss(pred, y)?;

                let grads = graph.gradients(loss, &ids)?;
                best.observe(graph.as_scalar(loss)?);

                for (param, grad) in self.params_mut().into_iter().zip(&grads) {
                    param.update(grad.view(), rate);
                }
            }

            epoch += 1;
            debug!("regression epoch {epoch}: best loss {}", best.best());
        }

        Ok(best.best())
    }

    /// Trains until the historical-minimum loss criterion is met. The
    /// loop is unbounded: data the network cannot fit keeps it running.
    pub fn train(&mut self, data: &VectorDataset) -> Result<()> {
        self.fit(data, BATCH_SIZE, RATE, LOSS_TARGET, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn run_maps_batches_to_single_columns() {
        let mut rng = StdRng::seed_from_u64(5);
        let model = RegressionModel::new(&mut rng);

        let x = Array2::from_shape_fn((4, 1), |(r, _)| r as f32);
        let out = model.run(x.view()).unwrap();
        assert_eq!(out.dim(), (4, 1));
    }

    #[test]
    fn descent_reduces_loss_on_a_fixed_batch() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut model = RegressionModel::new(&mut rng);

        let x = Array2::from_shape_fn((5, 1), |(r, _)| r as f32 - 2.0);
        let y = x.mapv(|v| v * v);
        let data = VectorDataset::new(x.clone(), y.clone());

        let before = model.get_loss(x.view(), y.view()).unwrap();
        model.fit(&data, 5, -1e-2, 0.0, Some(50)).unwrap();
        let after = model.get_loss(x.view(), y.view()).unwrap();

        assert!(after < before, "loss went from {before} to {after}");
    }
}
