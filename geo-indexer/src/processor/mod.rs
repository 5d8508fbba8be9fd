//! Processor module for the geo indexer pipeline.
//!
//! Transforms raw features into search documents and cross-reference maps,
//! repairing polygon geometry first when a job asks for it.

mod feature_processor;
pub mod geometry;
mod maps_store;
pub mod template;

pub use feature_processor::FeatureProcessor;
pub use geometry::{GeometryRepair, PolygonReducer, SimplifyReducer};
pub use maps_store::{deep_merge, MapsStore};
pub use template::{TemplateContext, TemplateError};
