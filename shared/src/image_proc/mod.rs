//! Pixel format helpers shared by frame sources and the preprocessor.

pub mod image;
