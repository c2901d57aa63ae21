pub mod sql_validator;

pub use sql_validator::{SqlShape, SqlValidator};
