//! The grid engine autoscaler: watches a Grid Engine queue and launches or
//! tears down cloud pipeline runs to keep pending jobs moving
pub mod args;
pub mod autoscaler;
pub mod cloud;
pub mod cmd;
pub mod conf;
pub mod daemon;
pub mod demand;
pub mod error;
pub mod grid_engine;
pub mod host_storage;
pub mod instances;
pub mod launch_params;
pub mod models;
pub mod params;
pub mod scale_down;
pub mod scale_up;
pub mod trace;
pub mod worker_recorder;
pub mod worker_tags;
pub mod worker_validator;

pub use conf::Conf;
pub use error::Error;
