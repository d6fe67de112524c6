//! Multislice overlap-tomography phase retrieval.
//!
//! Forward model: propagator, overlap, fourier
//! Update: adjoint, constraints, positions
//! Orchestration: detector, preprocess, probe, batching, driver, io

pub mod adjoint;
pub mod batching;
pub mod constraints;
pub mod detector;
pub mod driver;
pub mod fourier;
pub mod io;
pub mod overlap;
pub mod positions;
pub mod preprocess;
pub mod probe;
pub mod propagator;
