//! # merge-engine
//!
//! Section-level merging of regenerated Markdown documents into existing
//! ones, keeping what humans wrote.
//!
//! ## Approach
//!
//! Both documents are split into heading-keyed sections. Every section the
//! two share is classified into at most one conflict, then a whole-document
//! strategy decides how the pair is reconciled:
//!
//! 1. **append** adds only sections the existing document lacks, under a
//!    timestamped separator.
//! 2. **merge** follows the candidate's order, resolves conflicts per
//!    section and keeps human-authored sections the candidate dropped.
//! 3. **replace** takes the candidate but restores metadata, manual-edit
//!    sections and preserve blocks.
//! 4. **version** stacks the candidate above the previous content.
//! 5. **smart** keeps the existing order and resolves each conflict by type.
//!
//! Content between `<!-- MANUAL-EDIT-START -->` / `<!-- MANUAL-EDIT-END -->`
//! markers is never altered by any strategy.
//!
//! ## Example
//!
//! ```rust
//! use merge_engine::{MergeOptions, Resolver, StrategyChoice};
//!
//! let resolver = Resolver::default();
//! let out = resolver.resolve_document(
//!     "# Guide\nOld intro.\n",
//!     "# Guide\nOld intro.\n## Install\nRun the installer.\n",
//!     &MergeOptions {
//!         strategy: StrategyChoice::Merge,
//!         ..Default::default()
//!     },
//! );
//!
//! assert_eq!(out.added_sections, vec!["Install".to_string()]);
//! println!("{}", out.merged_content);
//! ```

pub mod analysis;
pub mod classifier;
pub mod markers;
pub mod resolutions;
pub mod resolver;
pub mod sections;
pub mod strategies;
pub mod types;

pub use classifier::{ClassifierThresholds, ConflictClassifier};
pub use markers::{MarkerIssue, MarkerKind, MarkerMeta, MarkerValidation};
pub use resolver::{DocumentMergeOutput, MergeOptions, Resolver, ResolverConfig};
pub use sections::{parse_sections, render_sections};
pub use strategies::{SelectionThresholds, select_strategy};
pub use types::*;
