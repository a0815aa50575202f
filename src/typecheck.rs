//! Result-type assignment for arithmetic statements.
//!
//! Lowering and the vectorizer create `Binary`/`Unary` statements with an
//! unknown type and call [`typecheck`] on each one right after creating it.

use crate::errors::TypeCheckError;
use crate::ir::{IrFunction, StmtId, StmtKind, UnaryOp};
use crate::types::{DataType, VectorType};

/// Assigns the result type of a single binary or unary statement from its operands.
///
/// Both operands of a binary operation must have the same width; the result
/// has that width and the promoted element type (`i32` for comparisons).
pub fn typecheck(ir: &mut IrFunction, stmt: StmtId) -> Result<(), TypeCheckError> {
    let ret_type = match ir[stmt].kind {
        StmtKind::Binary { op, lhs, rhs } => {
            let (lhs, rhs) = (ir[lhs].ret_type, ir[rhs].ret_type);
            if lhs.width != rhs.width {
                return Err(TypeCheckError::WidthMismatch {
                    stmt,
                    lhs: lhs.width,
                    rhs: rhs.width,
                });
            }
            let dtype = lhs
                .dtype
                .promote(rhs.dtype)
                .ok_or(TypeCheckError::IncompatibleOperands {
                    stmt,
                    lhs: lhs.dtype,
                    rhs: rhs.dtype,
                })?;
            if op.is_comparison() {
                VectorType::new(DataType::I32, lhs.width)
            } else {
                VectorType::new(dtype, lhs.width)
            }
        }
        StmtKind::Unary { op, operand } => {
            let operand = ir[operand].ret_type;
            if !operand.dtype.is_numeric() {
                return Err(TypeCheckError::IncompatibleOperands {
                    stmt,
                    lhs: operand.dtype,
                    rhs: operand.dtype,
                });
            }
            match op {
                UnaryOp::Sqrt => VectorType::new(DataType::F32, operand.width),
                UnaryOp::Neg | UnaryOp::Abs => operand,
            }
        }
        _ => return Err(TypeCheckError::NotAnOperation(stmt)),
    };
    ir[stmt].ret_type = ret_type;
    Ok(())
}
