pub mod serialization;

pub use serialization::{NTriplesSerializer, Table};
