use ndarray::{Array2, ArrayView2, Axis, CowArray, Ix2};

use crate::error::{GraphErr, Result};
use crate::parameter::Parameter;

/// Handle to a node in a [`Graph`]. Ids are only meaningful for the graph
/// that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Clone, Copy)]
enum Expr {
    Leaf,
    Linear(NodeId, NodeId),
    AddBias(NodeId, NodeId),
    Add(NodeId, NodeId),
    Relu(NodeId),
    DotProduct(NodeId, NodeId),
    SquareLoss(NodeId, NodeId),
    SoftmaxLoss(NodeId, NodeId),
}

struct Node<'a> {
    expr: Expr,
    value: CowArray<'a, f32, Ix2>,
}

/// The computation tape for one forward/backward pass.
///
/// Nodes are immutable once pushed and hold their forward value eagerly;
/// inputs and parameters are borrowed, derived values are owned. A graph
/// lives for a single training step: build the forward pass, take
/// [`Graph::gradients`], drop it, then update the parameters.
#[derive(Default)]
pub struct Graph<'a> {
    nodes: Vec<Node<'a>>,
}

impl<'a> Graph<'a> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Registers a batch of input data as a leaf.
    pub fn input(&mut self, x: ArrayView2<'a, f32>) -> NodeId {
        self.push(Expr::Leaf, x.into())
    }

    /// Registers a parameter as a leaf. The returned id is what
    /// [`Graph::gradients`] keys gradients on.
    pub fn parameter(&mut self, param: &'a Parameter) -> NodeId {
        self.push(Expr::Leaf, param.value().into())
    }

    /// Matrix product, `(n x a) . (a x b) -> (n x b)`.
    pub fn linear(&mut self, x: NodeId, w: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(x), self.dim(w));
        if lhs.1 != rhs.0 {
            return Err(GraphErr::ShapeMismatch { op: "linear", lhs, rhs });
        }

        let value = self.value(x).dot(&self.value(w));
        Ok(self.push(Expr::Linear(x, w), value.into()))
    }

    /// Adds a `1 x c` bias row to every row of an `n x c` batch.
    pub fn add_bias(&mut self, x: NodeId, b: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(x), self.dim(b));
        if rhs != (1, lhs.1) {
            return Err(GraphErr::ShapeMismatch { op: "add_bias", lhs, rhs });
        }

        let value = &self.value(x) + &self.value(b);
        Ok(self.push(Expr::AddBias(x, b), value.into()))
    }

    /// Elementwise sum of two equally shaped nodes.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(a), self.dim(b));
        if lhs != rhs {
            return Err(GraphErr::ShapeMismatch { op: "add", lhs, rhs });
        }

        let value = &self.value(a) + &self.value(b);
        Ok(self.push(Expr::Add(a, b), value.into()))
    }

    /// Elementwise `max(0, x)`.
    pub fn relu(&mut self, x: NodeId) -> NodeId {
        let value = self.value(x).mapv(|v| v.max(0.0));
        self.push(Expr::Relu(x), value.into())
    }

    /// Pairwise row dots, `a . b^T`. With two row vectors this is the
    /// scalar dot product.
    pub fn dot_product(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(a), self.dim(b));
        if lhs.1 != rhs.1 {
            return Err(GraphErr::ShapeMismatch { op: "dot_product", lhs, rhs });
        }

        let value = self.value(a).dot(&self.value(b).t());
        Ok(self.push(Expr::DotProduct(a, b), value.into()))
    }

    /// Scalar node holding `mean((pred - target)^2 / 2)` over the batch.
    pub fn square_loss(&mut self, pred: NodeId, target: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(pred), self.dim(target));
        if lhs != rhs {
            return Err(GraphErr::ShapeMismatch { op: "square_loss", lhs, rhs });
        }

        let diff = &self.value(pred) - &self.value(target);
        let loss = diff.mapv(|d| d * d / 2.0).mean().unwrap_or_default();
        Ok(self.push(Expr::SquareLoss(pred, target), Array2::from_elem((1, 1), loss).into()))
    }

    /// Scalar node holding the mean softmax cross-entropy of `logits`
    /// against one-hot `target` rows.
    pub fn softmax_loss(&mut self, logits: NodeId, target: NodeId) -> Result<NodeId> {
        let (lhs, rhs) = (self.dim(logits), self.dim(target));
        if lhs != rhs {
            return Err(GraphErr::ShapeMismatch { op: "softmax_loss", lhs, rhs });
        }

        let logp = log_softmax(self.value(logits));
        let loss = -(&logp * &self.value(target)).sum() / lhs.0 as f32;
        Ok(self.push(Expr::SoftmaxLoss(logits, target), Array2::from_elem((1, 1), loss).into()))
    }

    /// Extracts the single value of a 1x1 node.
    pub fn as_scalar(&self, node: NodeId) -> Result<f32> {
        let (rows, cols) = self.dim(node);
        if (rows, cols) != (1, 1) {
            return Err(GraphErr::NotScalar { rows, cols });
        }
        Ok(self.value(node)[[0, 0]])
    }

    /// The forward value of any node.
    pub fn value(&self, node: NodeId) -> ArrayView2<'_, f32> {
        self.nodes[node.0].value.view()
    }

    /// Reverse-mode sweep from a scalar `loss` node.
    ///
    /// Returns one gradient per requested parameter, in the same order and
    /// with the same shape. A parameter with no path to the loss gets a
    /// zero matrix.
    pub fn gradients(&self, loss: NodeId, params: &[NodeId]) -> Result<Vec<Array2<f32>>> {
        let (rows, cols) = self.dim(loss);
        if (rows, cols) != (1, 1) {
            return Err(GraphErr::NotScalar { rows, cols });
        }

        let mut grads: Vec<Option<Array2<f32>>> = vec![None; self.nodes.len()];
        grads[loss.0] = Some(Array2::ones((1, 1)));

        // Ids only reference earlier ids, so reverse insertion order is a
        // reverse topological order.
        for id in (0..=loss.0).rev() {
            let Some(g) = grads[id].take() else { continue };

            match self.nodes[id].expr {
                Expr::Leaf => grads[id] = Some(g),
                Expr::Linear(x, w) => {
                    let gx = g.dot(&self.value(w).t());
                    let gw = self.value(x).t().dot(&g);
                    accumulate(&mut grads, x, gx);
                    accumulate(&mut grads, w, gw);
                }
                Expr::AddBias(x, b) => {
                    let gb = g.sum_axis(Axis(0)).insert_axis(Axis(0));
                    accumulate(&mut grads, b, gb);
                    accumulate(&mut grads, x, g);
                }
                Expr::Add(a, b) => {
                    accumulate(&mut grads, a, g.clone());
                    accumulate(&mut grads, b, g);
                }
                Expr::Relu(x) => {
                    let mut gx = g;
                    gx.zip_mut_with(&self.nodes[id].value, |gv, &out| {
                        if out <= 0.0 {
                            *gv = 0.0;
                        }
                    });
                    accumulate(&mut grads, x, gx);
                }
                Expr::DotProduct(a, b) => {
                    let ga = g.dot(&self.value(b));
                    let gb = g.t().dot(&self.value(a));
                    accumulate(&mut grads, a, ga);
                    accumulate(&mut grads, b, gb);
                }
                Expr::SquareLoss(a, b) => {
                    let scale = g[[0, 0]] / self.value(a).len() as f32;
                    let ga = (&self.value(a) - &self.value(b)).mapv(|d| d * scale);
                    let gb = ga.mapv(|d| -d);
                    accumulate(&mut grads, a, ga);
                    accumulate(&mut grads, b, gb);
                }
                Expr::SoftmaxLoss(z, y) => {
                    let scale = g[[0, 0]] / self.dim(z).0 as f32;
                    let logp = log_softmax(self.value(z));
                    let gz = (&logp.mapv(f32::exp) - &self.value(y)).mapv(|v| v * scale);
                    let gy = logp.mapv(|v| -v * scale);
                    accumulate(&mut grads, z, gz);
                    accumulate(&mut grads, y, gy);
                }
            }
        }

        Ok(params
            .iter()
            .map(|p| grads[p.0].clone().unwrap_or_else(|| Array2::zeros(self.dim(*p))))
            .collect())
    }

    fn dim(&self, node: NodeId) -> (usize, usize) {
        self.nodes[node.0].value.dim()
    }

    fn push(&mut self, expr: Expr, value: CowArray<'a, f32, Ix2>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { expr, value });
        id
    }
}

fn accumulate(grads: &mut [Option<Array2<f32>>], id: NodeId, g: Array2<f32>) {
    match grads[id.0].as_mut() {
        Some(acc) => *acc += &g,
        None => grads[id.0] = Some(g),
    }
}

/// Row-wise log-softmax with the usual max shift.
fn log_softmax(z: ArrayView2<f32>) -> Array2<f32> {
    let mut out = z.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let lse = row.fold(0.0, |s, &v| s + (v - max).exp()).ln() + max;
        row.mapv_inplace(|v| v - lse);
    }
    out
}
