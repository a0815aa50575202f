//! Loop vectorization for a lane-typed array IR.
//!
//! This crate widens the bodies of bounded loops so that one execution of the
//! body covers several consecutive iterations, one per vector lane. It
//! builds on top of the [evalexpr](https://github.com/ISibboI/evalexpr) crate
//! for parsing kernel expressions, lowers them into an arena IR and ships a
//! reference interpreter to check that vectorized code computes what the
//! scalar code did.
//!
//! # Features
//!
//! - Loop vectorization pass with per-loop factors
//! - Lane offsets for loop induction variables and vector-valued locals
//! - Lowering of expression strings into IR kernels
//! - Reference interpreter for scalar and vectorized IR
//! - Parallel processing of kernel batches
//!
//! # Example
//!
//! ```rust
//! use loop_vectorize::Kernel;
//!
//! // for i in 0..8 (vectorize 4) { out[i] = i * 2 + x[i] }
//! let mut kernel = Kernel::new("i * 2 + x".to_string(), 8, 4).unwrap();
//! kernel.vectorize().unwrap();
//!
//! let x = [1.0f32; 8];
//! let result = kernel.run(&[&x]).unwrap();
//! assert_eq!(result, vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0]);
//! ```

pub use kernel::Kernel;
pub use system::KernelSystem;
pub use vectorize::{loop_vectorize, LoopVectorize};

pub mod prelude {
    pub use crate::builder::IrBuilder;
    pub use crate::ir::{BinaryOp, IrFunction, StmtKind, UnaryOp};
    pub use crate::kernel::Kernel;
    pub use crate::types::{DataType, VectorType};
    pub use crate::vectorize::loop_vectorize;
}

/// Construction of IR functions
pub mod builder;
/// Lowering of parsed expressions into IR
pub mod convert;
/// Error types for the various failure modes
pub mod errors;
/// Reference interpreter
pub mod interp;
/// Arena IR: statements, blocks and storage fields
pub mod ir;
/// Kernels built from expression strings
pub mod kernel;
/// Batches of kernels
pub mod system;
/// Result-type assignment for synthesized operations
pub mod typecheck;
/// Scalar, vector and per-lane types
pub mod types;
/// The loop vectorization pass
pub mod vectorize;
