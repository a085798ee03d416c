//! Observation sets: the data model, lateness, date parsing, aggregation reports, storage
//! and the service tying them together.

pub mod aggregation;
pub mod dates;
pub mod model;
pub mod service;
pub mod store;
pub mod timing;

pub use model::{Observation, ObservationMetadata, ObservationSet};
pub use service::ObservationService;
pub use store::{InMemoryObservationStore, ObservationStore, PostgresObservationStore};
