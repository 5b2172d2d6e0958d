pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod util;

pub use config::{Config, Settings, TargetSpec};
pub use error::{
    AggregationInvariantError, CollectionError, CollectionErrorKind, ConfigError, ServiceError,
    ServiceErrorKind, TriggerError,
};
pub use service::{JobService, StartRequest};
