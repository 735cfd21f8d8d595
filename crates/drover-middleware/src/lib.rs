//! The chat middleware chain and its built-in inspectors.
//!
//! A chain holds an ordered list of middlewares around one resolved adapter.
//! Pre-hooks run in declared order and may mutate the request, reroute the
//! provider (one re-resolve per run), or block delivery outright; post-hooks
//! run in the SAME declared order so downstream middlewares (cost
//! attribution) see the tags upstream ones (classification) produced.

pub mod chain;
pub mod classifier;
pub mod detectors;
pub mod finops;
pub mod guard;
pub mod sanitizer;

pub use chain::{build_middlewares, blocked_response, Chain, ChainError, Middleware};
pub use classifier::ContentClassifier;
pub use detectors::{Detection, DetectorCategory, DetectorSet};
pub use finops::FinOpsRecorder;
pub use guard::PromptGuard;
pub use sanitizer::OutputSanitizer;
