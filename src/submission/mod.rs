//! On-chain submission of consensus values.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use oracle_node::submission::SubmissionPipeline;
//!
//! let pipeline = SubmissionPipeline::new(chain, &config.submission);
//! let response = pipeline.submit(request_id, &value).await?;
//! println!("confirmed in block {}", response.block_number);
//! ```

pub mod pipeline;
pub mod retry;

pub use pipeline::{ChainResponse, PipelineStats, SubmissionKey, SubmissionPipeline};
pub use retry::RetryPolicy;
