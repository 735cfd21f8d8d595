//! Core types shared across the drover provider layer: configuration,
//! the error taxonomy, model references, request metadata, runtime events,
//! and secret masking.

pub mod config;
pub mod error;
pub mod events;
pub mod mask;
pub mod model_ref;
pub mod types;

pub use error::{DroverError, Result};
pub use model_ref::ModelRef;
pub use types::{MessageType, RequestMeta};
