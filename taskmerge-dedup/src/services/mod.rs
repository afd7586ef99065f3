//! Deduplication services
//!
//! Leaf-first: text similarity primitives, the pair scorer, the merge
//! engine, the detection orchestrator, review/reporting, and the pipeline
//! runner used by external triggers.

pub mod deduplication;
pub mod duplicate_detector;
pub mod pipeline;
pub mod similarity_scorer;
pub mod task_merger;
pub mod text_similarity;

pub use deduplication::DeduplicationService;
pub use duplicate_detector::{optimized_duplicate_detection, DuplicateDetector};
pub use pipeline::PipelineRunner;
pub use similarity_scorer::{calculate_duplicate_score, classify_confidence};
pub use task_merger::{TaskMerger, AUTO_MERGE_CONFIDENCE};
