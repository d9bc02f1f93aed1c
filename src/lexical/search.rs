//! Query execution: weights, scorers, scoring functions and collectors.

pub mod collector;
pub mod scorer;
pub mod scoring;
pub mod searcher;
pub mod weight;
