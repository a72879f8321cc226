//! Per-function emission
//!
//! `FunctionBuilder` is the only way code reaches an interface. It drives
//! the hooks in order and refuses anything else:
//!
//! ```text
//! Unstarted -> PrologueEmitted -> BodyEmitted -> EpilogueEmitted -> Finalized
//! ```

mod builder;

pub use builder::{EmissionState, FunctionBuilder};
