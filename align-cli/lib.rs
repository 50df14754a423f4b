//! Alignment orchestration: loads an image stack from a store, aligns every
//! image onto the first one and persists each result as soon as it is ready.
//! The aligned stack can then be composited into a single focus-stacked image.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod stack;
pub mod store;

pub use config::{AlignConfig, Canvas, StackConfig, StackMethod};
pub use error::{AlignError, ConfigError, FailureKind, PipelineError, StackError, StoreError};
pub use pipeline::{Aligner, AlignmentResult, ReferenceFrame};
pub use report::{AlignmentReport, ImageOutcome, Stage};
pub use stack::{
    composite_path, generalized_stack, laplacian_stack, save_composite, stack_persisted, BlockStack,
};
pub use store::{FsImageStore, ImageStore, MemoryImageStore, Sampling, IMAGE_EXTENSIONS};

pub use align_core;
pub use align_features;
pub use align_geometry;
