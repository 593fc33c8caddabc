use autograd::{Graph, NodeId, Parameter, Result, SequenceDataset};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use rand::Rng;

/// Size of the combined alphabet across the five languages.
pub const ALPHABET_SIZE: usize = 47;
/// The language classes, in score-column order.
pub const LANGUAGES: [&str; 5] = ["English", "Spanish", "Finnish", "Dutch", "Polish"];

const HIDDEN: usize = 100;

const BATCH_SIZE: usize = 10;
const RATE: f32 = -1e-2;
const STOP_ACCURACY: f32 = 0.90;

/// A recurrent classifier over words encoded as per-character one-hot
/// rows. One shared cell is applied at every position; the final hidden
/// state feeds a linear-plus-bias head scoring each language.
pub struct LanguageClassifier {
    w_input: Parameter,
    w_hidden: Parameter,
    w_output: Parameter,
    b_output: Parameter,
}

impl LanguageClassifier {
    pub fn new(rng: &mut impl Rng) -> Self {
        Self {
            w_input: Parameter::new(ALPHABET_SIZE, HIDDEN, rng),
            w_hidden: Parameter::new(HIDDEN, HIDDEN, rng),
            w_output: Parameter::new(HIDDEN, LANGUAGES.len(), rng),
            b_output: Parameter::new(1, LANGUAGES.len(), rng),
        }
    }

    /// Builds the unrolled cell. The hidden state lives in an `Option`:
    /// `None` until the first element seeds it with `relu(x W_in)`, then
    /// every further element folds in as `relu(x W_in + h W_hh)`.
    fn wire<'a>(
        &'a self,
        graph: &mut Graph<'a>,
        steps: &'a [Array2<f32>],
    ) -> Result<(NodeId, [NodeId; 4])> {
        assert!(!steps.is_empty(), "sequence batches must have at least one element");

        let w_in = graph.parameter(&self.w_input);
        let w_hid = graph.parameter(&self.w_hidden);
        let w_out = graph.parameter(&self.w_output);
        let b_out = graph.parameter(&self.b_output);

        let mut hidden: Option<NodeId> = None;
        for step in steps {
            let x = graph.input(step.view());
            let wx = graph.linear(x, w_in)?;
            let z = match hidden {
                None => wx,
                Some(h) => {
                    let hh = graph.linear(h, w_hid)?;
                    graph.add(wx, hh)?
                }
            };
            hidden = Some(graph.relu(z));
        }

        let scores = match hidden {
            Some(h) => {
                let s = graph.linear(h, w_out)?;
                graph.add_bias(s, b_out)?
            }
            None => unreachable!("sequence length is asserted above"),
        };

        Ok((scores, [w_in, w_hid, w_out, b_out]))
    }

    fn params_mut(&mut self) -> [&mut Parameter; 4] {
        [
            &mut self.w_input,
            &mut self.w_hidden,
            &mut self.w_output,
            &mut self.b_output,
        ]
    }

    /// Class scores for a batch of `L` one-hot steps of shape `k x 47`,
    /// as a `k x 5` matrix regardless of `L`.
    ///
    /// # Panics
    /// If `steps` is empty.
    pub fn run(&self, steps: &[Array2<f32>]) -> Result<Array2<f32>> {
        let mut graph = Graph::new();
        let (scores, _) = self.wire(&mut graph, steps)?;
        Ok(graph.value(scores).to_owned())
    }

    /// Softmax cross-entropy of the scores against one-hot `y`.
    pub fn get_loss(&self, steps: &[Array2<f32>], y: ArrayView2<f32>) -> Result<f32> {
        let mut graph = Graph::new();
        let (scores, _) = self.wire(&mut graph, steps)?;
        let y = graph.input(y);
        let loss = graph.softmax_loss(scores, y)?;
        graph.as_scalar(loss)
    }

    /// Fixed-rate descent over length-uniform batches, checking
    /// validation accuracy each batch before the update and stopping once
    /// it exceeds `stop_accuracy` or the batch cap runs out. Returns the
    /// last validation accuracy observed.
    pub fn fit(
        &mut self,
        data: &SequenceDataset,
        batch_size: usize,
        rate: f32,
        stop_accuracy: f32,
        max_batches: Option<usize>,
    ) -> Result<f32> {
        let mut seen = 0;
        let mut accuracy = 0.0;

        loop {
            for batch in data.iterate_once(batch_size) {
                if max_batches.is_some_and(|cap| seen >= cap) {
                    return Ok(accuracy);
                }
                seen += 1;

                let mut graph = Graph::new();
                let (scores, ids) = self.wire(&mut graph, &batch.steps)?;
                let labels = graph.input(batch.labels.view());
                let loss = graph.softmax_loss(scores, labels)?;

                accuracy = data.validation_accuracy(|steps| self.run(steps))?;
                if accuracy > stop_accuracy {
                    info!("language classifier stopped at {accuracy:.3} validation accuracy");
                    return Ok(accuracy);
                }

                let grads = graph.gradients(loss, &ids)?;
                for (param, grad) in self.params_mut().into_iter().zip(&grads) {
                    param.update(grad.view(), rate);
                }
                debug!("language batch {seen}: validation accuracy {accuracy:.3}");
            }
        }
    }

    /// Trains at the default rate until validation accuracy clears the
    /// stop threshold. No epoch cap below that accuracy.
    pub fn train(&mut self, data: &SequenceDataset) -> Result<()> {
        self.fit(data, BATCH_SIZE, RATE, STOP_ACCURACY, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autograd::one_hot;
    use rand::{rngs::StdRng, SeedableRng};

    fn step(ids: &[usize]) -> Array2<f32> {
        one_hot(ids, ALPHABET_SIZE)
    }

    #[test]
    fn run_shape_is_independent_of_sequence_length() {
        let mut rng = StdRng::seed_from_u64(9);
        let model = LanguageClassifier::new(&mut rng);

        for len in [1, 3, 8] {
            let steps: Vec<_> = (0..len).map(|t| step(&[t % 47, (t + 5) % 47])).collect();
            let scores = model.run(&steps).unwrap();
            assert_eq!(scores.dim(), (2, LANGUAGES.len()));
        }
    }

    #[test]
    fn single_step_matches_a_manual_forward_pass() {
        let mut rng = StdRng::seed_from_u64(10);
        let model = LanguageClassifier::new(&mut rng);

        let x = step(&[3]);
        let scores = model.run(std::slice::from_ref(&x)).unwrap();

        let h = x.dot(&model.w_input.value()).mapv(|v| v.max(0.0));
        let manual = h.dot(&model.w_output.value()) + &model.b_output.value();

        let diff = &scores - &manual;
        assert!(diff.iter().all(|d| d.abs() < 1e-6));
    }

    #[test]
    fn hidden_transform_is_unused_for_single_steps() {
        let mut rng = StdRng::seed_from_u64(12);
        let model = LanguageClassifier::new(&mut rng);

        let steps = [step(&[1, 2])];
        let labels = one_hot(&[0, 1], LANGUAGES.len());

        let mut graph = Graph::new();
        let (scores, ids) = model.wire(&mut graph, &steps).unwrap();
        let y = graph.input(labels.view());
        let loss = graph.softmax_loss(scores, y).unwrap();

        let grads = graph.gradients(loss, &ids).unwrap();
        assert_eq!(grads.len(), 4);
        assert!(grads[1].iter().all(|&g| g == 0.0), "no path through W_hh at length 1");
        assert!(grads[0].iter().any(|&g| g != 0.0));
    }

    #[test]
    #[should_panic(expected = "at least one element")]
    fn empty_sequences_are_rejected() {
        let mut rng = StdRng::seed_from_u64(13);
        let model = LanguageClassifier::new(&mut rng);
        let _ = model.run(&[]);
    }
}
