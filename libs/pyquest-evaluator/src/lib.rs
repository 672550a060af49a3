//! Evaluation core for PyQuest lesson sections.
//!
//! Student Python runs inside an [`interpreter::Session`] under a synthesized
//! [`harness`]; the sentinel-delimited output is decoded by [`parser`],
//! judged by [`oracle`] or [`turtle`], summarised by [`verdict`], and
//! completion is persisted through a [`progress::ProgressStore`].
//! [`evaluator::Evaluator`] ties these together per section kind.

pub mod coverage;
pub mod diff;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod interpreter;
pub mod oracle;
pub mod parser;
pub mod progress;
pub mod turtle;
pub mod verdict;

pub use error::{EvalError, Result};
pub use evaluator::{Evaluation, Evaluator};
pub use progress::{MemoryProgressStore, ProgressStore, RedisProgressStore};
