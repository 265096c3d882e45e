//! Fits rod-shaped (bacillus) cell models to a microscopy time series.
//!
//! A fixed-size window slides over the frames; every window is optimised by
//! several independent simulated-annealing jobs, one candidate is selected, and
//! the oldest frame of the window is committed to the lineage and written out.

pub mod config;
pub mod engine;
pub mod error;
pub mod io;
