mod data;
mod error;
mod graph;
mod parameter;

pub use data::{one_hot, Batches, SeqBatch, SeqBatches, Sequence, SequenceDataset, VectorDataset};
pub use error::{GraphErr, Result};
pub use graph::{Graph, NodeId};
pub use parameter::Parameter;
