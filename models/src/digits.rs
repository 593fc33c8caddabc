use autograd::{Graph, NodeId, Parameter, Result, VectorDataset};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::control::{Decision, LrSchedule, LrStep};

/// Flattened 28x28 grayscale input.
pub const IMAGE_PIXELS: usize = 784;
/// Digit classes 0 through 9.
pub const CLASSES: usize = 10;

/// Hidden widths of the four rectified layers.
const HIDDEN: [usize; 4] = [200, 100, 30, 15];

const BATCH_SIZE: usize = 20;

/// A feed-forward image classifier: four rectified hidden layers and a
/// linear head scoring each digit class.
pub struct DigitClassifier {
    w1: Parameter,
    b1: Parameter,
    w2: Parameter,
    b2: Parameter,
    w3: Parameter,
    b3: Parameter,
    w4: Parameter,
    b4: Parameter,
    w5: Parameter,
    b5: Parameter,
}

impl DigitClassifier {
    pub fn new(rng: &mut impl Rng) -> Self {
        let [h1, h2, h3, h4] = HIDDEN;
        Self {
            w1: Parameter::new(IMAGE_PIXELS, h1, rng),
            b1: Parameter::new(1, h1, rng),
            w2: Parameter::new(h1, h2, rng),
            b2: Parameter::new(1, h2, rng),
            w3: Parameter::new(h2, h3, rng),
            b3: Parameter::new(1, h3, rng),
            w4: Parameter::new(h3, h4, rng),
            b4: Parameter::new(1, h4, rng),
            w5: Parameter::new(h4, CLASSES, rng),
            b5: Parameter::new(1, CLASSES, rng),
        }
    }

    /// The annealing table used by [`DigitClassifier::train`]: stop above
    /// 0.973 validation accuracy, step magnitude shrinking as accuracy
    /// climbs.
    pub fn schedule() -> LrSchedule {
        LrSchedule::new(
            0.973,
            vec![
                LrStep { min_accuracy: 0.970, rate: -5e-3 },
                LrStep { min_accuracy: 0.960, rate: -5e-2 },
                LrStep { min_accuracy: 0.750, rate: -1e-1 },
                LrStep { min_accuracy: 0.450, rate: -5e-1 },
            ],
            -5.5e-1,
        )
    }

    fn wire<'a>(
        &'a self,
        graph: &mut Graph<'a>,
        x: ArrayView2<'a, f32>,
    ) -> Result<(NodeId, [NodeId; 10])> {
        let w1 = graph.parameter(&self.w1);
        let b1 = graph.parameter(&self.b1);
        let w2 = graph.parameter(&self.w2);
        let b2 = graph.parameter(&self.b2);
        let w3 = graph.parameter(&self.w3);
        let b3 = graph.parameter(&self.b3);
        let w4 = graph.parameter(&self.w4);
        let b4 = graph.parameter(&self.b4);
        let w5 = graph.parameter(&self.w5);
        let b5 = graph.parameter(&self.b5);

        let mut h = graph.input(x);
        for (w, b) in [(w1, b1), (w2, b2), (w3, b3), (w4, b4)] {
            let z = graph.linear(h, w)?;
            let z = graph.add_bias(z, b)?;
            h = graph.relu(z);
        }
        let scores = graph.linear(h, w5)?;
        let scores = graph.add_bias(scores, b5)?;

        Ok((scores, [w1, b1, w2, b2, w3, b3, w4, b4, w5, b5]))
    }

    fn params_mut(&mut self) -> [&mut Parameter; 10] {
        [
            &mut self.w1,
            &mut self.b1,
            &mut self.w2,
            &mut self.b2,
            &mut self.w3,
            &mut self.b3,
            &mut self.w4,
            &mut self.b4,
            &mut self.w5,
            &mut self.b5,
        ]
    }

    /// Class scores for a `k x 784` batch, as a `k x 10` matrix.
    pub fn run(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut graph = Graph::new();
        let (scores, _) = self.wire(&mut graph, x)?;
        Ok(graph.value(scores).to_owned())
    }

    /// Softmax cross-entropy of the scores against one-hot `y`.
    pub fn get_loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        let mut graph = Graph::new();
        let (scores, _) = self.wire(&mut graph, x)?;
        let y = graph.input(y);
        let loss = graph.softmax_loss(scores, y)?;
        graph.as_scalar(loss)
    }

    /// Runs batches through the schedule until it signals stop or the
    /// batch cap runs out. Gradients are computed for every batch before
    /// the accuracy check, so a stop discards the last gradient set.
    /// Returns the last validation accuracy observed.
    pub fn fit(
        &mut self,
        data: &VectorDataset,
        batch_size: usize,
        schedule: &LrSchedule,
        max_batches: Option<usize>,
    ) -> Result<f32> {
        let mut seen = 0;
        let mut accuracy = 0.0;

        loop {
            for (x, y) in data.iterate_once(batch_size) {
                if max_batches.is_some_and(|cap| seen >= cap) {
                    return Ok(accuracy);
                }
                seen += 1;

                let mut graph = Graph::new();
                let (scores, ids) = self.wire(&mut graph, x)?;
                let y = graph.input(y);
                let loss = graph.softmax_loss(scores, y)?;
                let grads = graph.gradients(loss, &ids)?;

                accuracy = data.validation_accuracy(|v| self.run(v))?;
                match schedule.pick(accuracy) {
                    Decision::Stop => {
                        info!("digit classifier stopped at {accuracy:.3} validation accuracy");
                        return Ok(accuracy);
                    }
                    Decision::Rate(rate) => {
                        for (param, grad) in self.params_mut().into_iter().zip(&grads) {
                            param.update(grad.view(), rate);
                        }
                    }
                }
                debug!("digit batch {seen}: validation accuracy {accuracy:.3}");
            }
        }
    }

    /// Trains with the default schedule until validation accuracy clears
    /// its stop threshold. No epoch cap: the loop is unbounded below that
    /// accuracy.
    pub fn train(&mut self, data: &VectorDataset) -> Result<()> {
        self.fit(data, BATCH_SIZE, &Self::schedule(), None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autograd::one_hot;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn run_keeps_the_batch_dimension() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = DigitClassifier::new(&mut rng);

        for k in [1, 7] {
            let x = Array2::zeros((k, IMAGE_PIXELS));
            let scores = model.run(x.view()).unwrap();
            assert_eq!(scores.dim(), (k, CLASSES));
        }
    }

    #[test]
    fn schedule_magnitudes_shrink_as_accuracy_rises() {
        let schedule = DigitClassifier::schedule();
        let accuracies = [0.20, 0.80, 0.965, 0.972, 0.975];

        let mut last_magnitude = f32::INFINITY;
        for (i, &accuracy) in accuracies.iter().enumerate() {
            let decision = schedule.pick(accuracy);
            if i == accuracies.len() - 1 {
                assert_eq!(decision, Decision::Stop, "stop expected only at {accuracy}");
            } else {
                let Decision::Rate(rate) = decision else {
                    panic!("premature stop at {accuracy}");
                };
                assert!(rate < 0.0);
                assert!(rate.abs() <= last_magnitude);
                last_magnitude = rate.abs();
            }
        }
    }

    #[test]
    fn descent_reduces_softmax_loss_on_a_fixed_batch() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut model = DigitClassifier::new(&mut rng);

        let x = Array2::from_shape_fn((20, IMAGE_PIXELS), |(r, c)| {
            ((r * 31 + c) % 17) as f32 / 17.0
        });
        let labels: Vec<usize> = (0..20).map(|r| r % CLASSES).collect();
        let y = one_hot(&labels, CLASSES);
        let data = VectorDataset::new(x.clone(), y.clone());

        let before = model.get_loss(x.view(), y.view()).unwrap();
        let gentle = LrSchedule::new(1.1, Vec::new(), -5e-2);
        model.fit(&data, 20, &gentle, Some(10)).unwrap();
        let after = model.get_loss(x.view(), y.view()).unwrap();

        assert!(after < before, "loss went from {before} to {after}");
    }
}
