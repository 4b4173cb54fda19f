//! Record schemas shared across the pipeline

pub mod article;

pub use article::*;
