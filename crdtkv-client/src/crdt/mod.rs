//! Convergent data types: building updates and reading values.

pub mod loader;
pub mod operation;
pub mod operator;
pub mod value;

pub use loader::{CrdtLoader, FetchOptions, Loaded};
pub use operation::{CrdtOperation, CrdtType, OperationValue, SetDelta};
pub use operator::{CrdtLocation, CrdtOperator, UpdateOptions, UpdateResponse};
pub use value::{CrdtValue, MapValue};
