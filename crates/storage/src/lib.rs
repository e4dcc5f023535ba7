pub mod state;

pub use state::{StateStore, SCHEMA_VERSION};
