//! Harness for exercising the topometry pipeline without a camera.

pub mod surface_source;

pub use surface_source::{Dropout, SurfaceParams, SyntheticSurfaceSource};
