//! Error types for the loop-vectorize crate.
//!
//! Each stage of the pipeline has its own error enum:
//!
//! - `TypeCheckError`: a synthesized operation whose operands do not agree
//! - `VectorizeError`: internal invariant violations hit by the vectorizer
//! - `ConvertError`: lowering an expression string into IR failed
//! - `EvalError`: the reference interpreter rejected a program
//! - `KernelError`: high-level errors when building and running kernels
//!
//! Errors of the earlier stages are wrapped into the later ones with `#[from]`.

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

use crate::ir::{BlockId, StmtId};
use crate::types::DataType;

/// Errors reported by [`typecheck`](crate::typecheck::typecheck).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeCheckError {
    /// Both operands of a binary operation must carry the same number of lanes
    #[error("operand width mismatch in {stmt}: lhs has {lhs} lanes, rhs has {rhs}")]
    WidthMismatch { stmt: StmtId, lhs: usize, rhs: usize },
    /// The operand types have no common numeric type
    #[error("incompatible operand types in {stmt}: {lhs} and {rhs}")]
    IncompatibleOperands {
        stmt: StmtId,
        lhs: DataType,
        rhs: DataType,
    },
    /// Only binary and unary operations are type checked here
    #[error("{0} is not a binary or unary operation")]
    NotAnOperation(StmtId),
}

/// Errors raised by the loop vectorizer.
///
/// All of them indicate a defect in an earlier stage. The pass stops at the
/// first one and the partially widened function must be discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorizeError {
    /// A load of a vector-valued local addressed a lane other than 0 before widening
    #[error("load {stmt} of vector-valued local {var} has offset {offset} in lane {lane}")]
    NonZeroOffset {
        stmt: StmtId,
        var: StmtId,
        lane: usize,
        offset: usize,
    },
    /// The add node combining a loop index with its lane offsets failed to type check
    #[error("lane offset for {stmt} failed to type check: {source}")]
    TypeCheck {
        stmt: StmtId,
        #[source]
        source: TypeCheckError,
    },
    /// A statement that needs its owning block is not a member of any block
    #[error("{0} is not a member of any block")]
    Detached(StmtId),
    /// The walker was handed a statement that is not in the given block
    #[error("{stmt} is not a member of block {block}")]
    NotInBlock { stmt: StmtId, block: BlockId },
}

/// Errors that can occur while lowering an evalexpr tree into IR.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Error when encountering an operator that is not supported by the lowering
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when encountering a function that is not supported by the lowering
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when a node does not have the expected number of children
    #[error("Unexpected operand count: {0}")]
    OperandCount(String),
    /// Error when a constant is not a number representable in the IR
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
    /// Error when a variable is neither the loop index nor a bound input
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    /// Error when a lowered operation does not type check
    #[error("Lowered operation does not type check")]
    TypeCheck(#[from] TypeCheckError),
}

/// Errors reported by the reference interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// An operand was used before the statement producing it executed
    #[error("{0} was used before it was evaluated")]
    Unevaluated(StmtId),
    /// Operand lane counts do not line up
    #[error("width mismatch at {stmt}: expected {expected} lanes, got {got}")]
    WidthMismatch {
        stmt: StmtId,
        expected: usize,
        got: usize,
    },
    /// A local address reads past the end of its slot
    #[error("{stmt} reads lane {offset} of {var}, which has {width} lanes")]
    LaneOutOfRange {
        stmt: StmtId,
        var: StmtId,
        offset: usize,
        width: usize,
    },
    /// A storage access lies outside the field
    #[error("index {index} is out of bounds for field '{field}' of length {len}")]
    OutOfBounds {
        field: String,
        index: i32,
        len: usize,
    },
    /// Branch or loop condition differs between lanes
    #[error("condition {0} is not uniform across lanes")]
    DivergentLanes(StmtId),
    /// A vectorized loop must cover its range in whole vector steps
    #[error("range {begin}..{end} is not a multiple of the vector step {step}")]
    TripCount { begin: i32, end: i32, step: usize },
    /// A bounded loop ran inside a loop that executes several iterations per step
    #[error("{inner} runs inside {outer}, which executes several iterations per step")]
    NestedVectorizedLoop { outer: StmtId, inner: StmtId },
    /// Integer division or remainder by zero
    #[error("integer division by zero at {0}")]
    DivisionByZero(StmtId),
    /// The statement kind does not produce the value the consumer expects
    #[error("{stmt} does not produce a {expected}")]
    UnexpectedKind { stmt: StmtId, expected: &'static str },
}

/// High-level errors when building, vectorizing and running kernels.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Error when parsing the kernel expression string with evalexpr
    #[error("Failed to parse kernel expression")]
    Parse(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when lowering the parsed expression into IR
    #[error("Failed to lower kernel expression")]
    Convert(#[from] ConvertError),
    /// Error inside the vectorizer
    #[error("Failed to vectorize kernel")]
    Vectorize(#[from] VectorizeError),
    /// Error when interpreting the kernel
    #[error("Failed to run kernel")]
    Eval(#[from] EvalError),
    /// The vectorization factor must be at least 1
    #[error("Invalid vectorization factor: {0}")]
    InvalidFactor(usize),
    /// The loop extent must be representable as an `i32` index
    #[error("Extent {0} does not fit in an i32 index")]
    ExtentTooLarge(usize),
    /// The vectorizer may only run once per kernel
    #[error("Kernel is already vectorized")]
    AlreadyVectorized,
    /// Error when the number of inputs is not the number of kernel variables
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when an input array does not match the kernel extent
    #[error("Invalid length for input '{name}': expected {expected}, got {got}")]
    InvalidFieldLength {
        name: String,
        expected: usize,
        got: usize,
    },
    /// Error when an input is given that the kernel does not read
    #[error("Variable not found in kernel: {0}")]
    VariableNotFound(String),
}
