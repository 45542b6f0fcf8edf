pub mod app;
pub mod collector;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod gpu;
pub mod k8s;
pub mod model;
pub mod report;
