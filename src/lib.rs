//! Classifier-guided region growing for assisted image labeling.
//!
//! The engine turns a handful of positive/negative brush strokes on a large
//! raster into a spatially coherent suggested region: strokes train a small
//! probabilistic pixel classifier, the classifier's output becomes a
//! traversal-cost field, and an incremental Dijkstra expansion over that
//! field produces a sequence of nested growth rings the user can walk
//! through before committing one into a persistent label raster.
//!
//! Rendering, pan/zoom, input wiring and file I/O live in the host
//! application; the host drives a [`Session`] with raw pixel coordinates and
//! reads back labels, the active ring outline, and (optionally) a grayscale
//! map of classifier confidence.

#![allow(clippy::too_many_arguments)]

pub mod classifier;
pub mod config;
pub mod cost_field;
pub mod features;
pub mod logger;
pub mod raster;
pub mod sampler;
pub mod session;

pub use config::{EngineConfig, TrainParams};
pub use session::{Session, SessionError};
