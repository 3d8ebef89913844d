//! tfmerge library crate.
//!
//! Merges several Terraform state documents into one. The entry point is
//! [`merge::merge`]; the state backend that physically moves resources
//! between states is injected through [`backend::StateBackend`].
//!
//! ```no_run
//! use tfmerge::backend::terraform::TerraformBackend;
//! use tfmerge::merge::{Source, merge};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = TerraformBackend::new("terraform")?;
//! let sources = vec![
//!     Source::new("a.tfstate", std::fs::read("a.tfstate")?),
//!     Source::new("b.tfstate", std::fs::read("b.tfstate")?),
//! ];
//! let merged = merge(&backend, None, &sources)?;
//! std::fs::write("merged.tfstate", merged)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod telemetry;

pub use error::MergeError;
pub use merge::{MergeOutcome, MergeReport, Source, merge, merge_with_report};
