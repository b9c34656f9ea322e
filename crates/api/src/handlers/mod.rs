pub mod annotations;
pub mod dataset;
pub mod dataset_changes;
pub mod jobs;
pub mod models;
