mod reporter;
mod store;

pub use reporter::{Emission, ObservationEvent, StateReporter};
pub use store::{spawn_writer, StatusStore, StoreError};
