pub mod canvas_ops;
pub mod interpolator;
pub mod processing;
pub mod pyramid;
pub mod transform;
