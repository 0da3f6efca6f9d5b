//! Exam assembly and grading
//!
//! Pure domain logic: candidate pool construction, blueprint-driven
//! paper assembly, and deterministic grading. Nothing in this module
//! touches the database or mutates state.

pub mod pool;
pub mod assembler;
pub mod grader;
pub mod codes;

pub use pool::{build_pool, PoolItem};
pub use assembler::assemble;
pub use grader::{grade, GradeResult, PASSING_PERCENT};
pub use codes::{generate_code, normalize_code, CODE_ALPHABET};
