pub mod evaluation;
pub mod hints;
pub mod intent;
pub mod schema;
pub mod translation;

pub use evaluation::*;
pub use hints::*;
pub use intent::*;
pub use schema::*;
pub use translation::*;
