//! Chart requirements, result analysis and data transformation

pub mod analysis;
pub mod registry;
pub mod transform;

pub use registry::{requirement, supported_chart_types, ChartRequirement};
pub use transform::{transform, transform_with_fallback, TransformInstructions};
