//! Numerical primitives for multislice overlap tomography.

pub mod backend;
pub mod fft;
pub mod filter;
pub mod linalg;
pub mod resample;
pub mod rotate;
pub mod shift;
