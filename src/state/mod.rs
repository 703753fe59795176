//! Named tensor state and its on-disk encoding.

mod dict;
pub mod io;

pub use dict::{OptimizerState, ParamState, StateDict, StateValue};
