pub mod aggregation;
pub mod annotation;
pub mod dataset;
pub mod dataset_change;
pub mod error;
pub mod job;
pub mod model;
pub mod pagination;
pub mod progress;
pub mod quality;
pub mod storage;
pub mod types;
