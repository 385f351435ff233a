#![doc = include_str!("../README.md")]

mod error;
mod eval;
mod skeleton;
mod value;

pub use error::Error;
pub use eval::{evaluate_expression, evaluate_fragment};
pub use skeleton::{
    DefaultEvaluator, DependencyPosition, Evaluation, FragmentEvaluator, Skeleton,
};
pub use value::{Origin, Value, Variable, VariableMap};
