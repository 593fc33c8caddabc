use std::collections::BTreeMap;

use ndarray::{s, Array2, ArrayView2};

use crate::error::Result;

/// One-hot encodes `indices` into an `indices.len() x width` matrix.
///
/// # Panics
/// If any index is out of range.
pub fn one_hot(indices: &[usize], width: usize) -> Array2<f32> {
    let mut out = Array2::zeros((indices.len(), width));
    for (row, &index) in indices.iter().enumerate() {
        assert!(index < width, "index {index} out of range for width {width}");
        out[[row, index]] = 1.0;
    }
    out
}

/// An immutable (inputs, labels) matrix pair with an optional held-out
/// validation split.
///
/// The dataset only provides access: batching is a cursor over the rows,
/// and validation accuracy is measured against whatever forward function
/// the caller supplies.
pub struct VectorDataset {
    x: Array2<f32>,
    y: Array2<f32>,
    val_x: Array2<f32>,
    val_y: Array2<f32>,
}

impl VectorDataset {
    /// Creates a dataset with no validation split.
    ///
    /// # Panics
    /// If `x` and `y` row counts differ or the dataset is empty.
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> Self {
        let (x_cols, y_cols) = (x.ncols(), y.ncols());
        Self::with_validation(x, y, Array2::zeros((0, x_cols)), Array2::zeros((0, y_cols)))
    }

    /// Creates a dataset with a held-out validation split.
    ///
    /// # Panics
    /// If the training split is empty, or any row/column counts disagree
    /// between inputs and labels or between the two splits.
    pub fn with_validation(
        x: Array2<f32>,
        y: Array2<f32>,
        val_x: Array2<f32>,
        val_y: Array2<f32>,
    ) -> Self {
        assert!(x.nrows() > 0, "dataset must be non-empty");
        assert_eq!(x.nrows(), y.nrows(), "inputs and labels must have the same row count");
        assert_eq!(
            val_x.nrows(),
            val_y.nrows(),
            "validation inputs and labels must have the same row count"
        );
        assert_eq!(x.ncols(), val_x.ncols(), "train and validation input widths must match");
        assert_eq!(y.ncols(), val_y.ncols(), "train and validation label widths must match");

        Self { x, y, val_x, val_y }
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One full in-order pass over the training split.
    ///
    /// # Panics
    /// If `batch_size` is zero or does not divide the dataset length.
    pub fn iterate_once(&self, batch_size: usize) -> Batches<'_> {
        assert!(batch_size > 0, "batch_size must be > 0");
        assert_eq!(
            self.len() % batch_size,
            0,
            "batch_size must divide the dataset length"
        );

        Batches { x: &self.x, y: &self.y, batch_size, cursor: 0 }
    }

    /// Fraction of the validation split whose argmax under `logits`
    /// matches the one-hot label. Zero when there is no validation split.
    pub fn validation_accuracy<F>(&self, mut logits: F) -> Result<f32>
    where
        F: FnMut(ArrayView2<f32>) -> Result<Array2<f32>>,
    {
        let total = self.val_x.nrows();
        if total == 0 {
            return Ok(0.0);
        }

        let scores = logits(self.val_x.view())?;
        let predicted = argmax_rows(scores.view());
        let truth = argmax_rows(self.val_y.view());
        let correct = predicted.iter().zip(&truth).filter(|(p, t)| p == t).count();
        Ok(correct as f32 / total as f32)
    }
}

/// Cursor over a dataset's rows, yielding borrowed `(inputs, labels)`
/// batches of matched row count.
pub struct Batches<'a> {
    x: &'a Array2<f32>,
    y: &'a Array2<f32>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = (ArrayView2<'a, f32>, ArrayView2<'a, f32>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.x.nrows() {
            return None;
        }

        let end = self.cursor + self.batch_size;
        let x = self.x.slice(s![self.cursor..end, ..]);
        let y = self.y.slice(s![self.cursor..end, ..]);
        self.cursor = end;
        Some((x, y))
    }
}

/// A variable-length sequence of character ids with a class label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub chars: Vec<usize>,
    pub label: usize,
}

/// An owned batch of equally long sequences, one-hot encoded per time
/// step: `steps[t]` is `batch x alphabet`, `labels` is `batch x classes`.
pub struct SeqBatch {
    pub steps: Vec<Array2<f32>>,
    pub labels: Array2<f32>,
}

/// Sequences of character ids grouped for batched recurrent training.
///
/// Sequence lengths vary across the dataset but every yielded batch is
/// length-uniform; the final batch of a length group may be smaller than
/// the requested batch size.
pub struct SequenceDataset {
    alphabet: usize,
    classes: usize,
    train: Vec<Sequence>,
    val: Vec<Sequence>,
}

impl SequenceDataset {
    /// # Panics
    /// If the training split is empty, any sequence is empty, or a
    /// character id or label is out of range.
    pub fn new(alphabet: usize, classes: usize, train: Vec<Sequence>, val: Vec<Sequence>) -> Self {
        assert!(!train.is_empty(), "dataset must be non-empty");
        for seq in train.iter().chain(&val) {
            assert!(!seq.chars.is_empty(), "sequences must be non-empty");
            assert!(
                seq.chars.iter().all(|&c| c < alphabet),
                "character id out of range for alphabet {alphabet}"
            );
            assert!(seq.label < classes, "label out of range for {classes} classes");
        }

        Self { alphabet, classes, train, val }
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One pass over the training split, lazily encoding length-uniform
    /// batches.
    ///
    /// # Panics
    /// If `batch_size` is zero.
    pub fn iterate_once(&self, batch_size: usize) -> SeqBatches<'_> {
        assert!(batch_size > 0, "batch_size must be > 0");

        SeqBatches {
            data: self,
            chunks: chunk_by_length(&self.train, batch_size),
            next: 0,
        }
    }

    /// Fraction of the validation split classified correctly by `logits`,
    /// evaluated one length group at a time. Zero when there is no
    /// validation split.
    pub fn validation_accuracy<F>(&self, mut logits: F) -> Result<f32>
    where
        F: FnMut(&[Array2<f32>]) -> Result<Array2<f32>>,
    {
        if self.val.is_empty() {
            return Ok(0.0);
        }

        let mut correct = 0;
        for chunk in chunk_by_length(&self.val, self.val.len()) {
            let batch = self.encode(&chunk, &self.val);
            let scores = logits(&batch.steps)?;
            let predicted = argmax_rows(scores.view());
            correct += predicted
                .iter()
                .zip(&chunk)
                .filter(|(p, i)| **p == self.val[**i].label)
                .count();
        }
        Ok(correct as f32 / self.val.len() as f32)
    }

    fn encode(&self, chunk: &[usize], pool: &[Sequence]) -> SeqBatch {
        let len = pool[chunk[0]].chars.len();
        let mut steps = Vec::with_capacity(len);
        for t in 0..len {
            let ids: Vec<usize> = chunk.iter().map(|&i| pool[i].chars[t]).collect();
            steps.push(one_hot(&ids, self.alphabet));
        }

        let labels: Vec<usize> = chunk.iter().map(|&i| pool[i].label).collect();
        SeqBatch { steps, labels: one_hot(&labels, self.classes) }
    }
}

/// Lazy iterator over a [`SequenceDataset`]'s length-uniform batches.
pub struct SeqBatches<'a> {
    data: &'a SequenceDataset,
    chunks: Vec<Vec<usize>>,
    next: usize,
}

impl Iterator for SeqBatches<'_> {
    type Item = SeqBatch;

    fn next(&mut self) -> Option<SeqBatch> {
        let chunk = self.chunks.get(self.next)?;
        self.next += 1;
        Some(self.data.encode(chunk, &self.data.train))
    }
}

/// Groups indices into `pool` by sequence length, then splits each group
/// into chunks of at most `batch_size`.
fn chunk_by_length(pool: &[Sequence], batch_size: usize) -> Vec<Vec<usize>> {
    let mut by_len: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, seq) in pool.iter().enumerate() {
        by_len.entry(seq.chars.len()).or_default().push(i);
    }

    by_len
        .into_values()
        .flat_map(|group| group.chunks(batch_size).map(|c| c.to_vec()).collect::<Vec<_>>())
        .collect()
}

fn argmax_rows(m: ArrayView2<f32>) -> Vec<usize> {
    m.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0
        })
        .collect()
}
