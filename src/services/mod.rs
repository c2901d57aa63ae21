pub mod aggregation;
pub mod assembler;
pub mod conditions;
pub mod confidence;
pub mod evaluator;
pub mod harness; // Strategy comparison over a labeled query set
pub mod ordering;
pub mod query_context;
pub mod special_cases;
pub mod strategies; // Pattern / LLM / semantic translation strategies
pub mod synonyms;
pub mod translator;

pub use aggregation::*;
pub use assembler::*;
pub use conditions::*;
pub use confidence::*;
pub use evaluator::*;
pub use harness::*;
pub use ordering::*;
pub use special_cases::*;
pub use strategies::*;
pub use synonyms::*;
pub use translator::*;
