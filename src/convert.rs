//! Lowering of evalexpr trees into IR statements.
//!
//! Kernel expressions are parsed with [evalexpr](https://github.com/ISibboI/evalexpr)
//! and lowered into scalar statements appended at the builder's cursor. Inside a
//! kernel the expression is evaluated once per loop iteration:
//!
//! - the loop index identifier becomes a load of the loop's induction slot
//! - every other identifier names an input field and becomes
//!   `global load(field[index])`, indexed by the loop index
//! - integer literals become `i32` constants, float literals `f32` constants
//!
//! Every read of the loop index emits its own load, as a front end would.

use std::collections::HashMap;

use evalexpr::{Node, Operator};

use crate::builder::IrBuilder;
use crate::errors::ConvertError;
use crate::ir::{BinaryOp, FieldId, StmtId, UnaryOp};

/// Names visible to a lowered expression.
#[derive(Debug, Clone)]
pub struct Bindings {
    /// Induction slot of the enclosing loop
    pub loop_var: StmtId,
    /// Identifier the expression uses for the loop index
    pub loop_var_name: String,
    /// Input fields by identifier
    pub fields: HashMap<String, FieldId>,
}

impl Bindings {
    fn index(&self, b: &mut IrBuilder) -> StmtId {
        b.local_load(self.loop_var)
    }
}

/// Lowers `node` at the builder's cursor and returns the statement holding its value.
///
/// # Supported operations
/// * Arithmetic: `+`, `-`, `*`, `/`, `%`, unary `-`
/// * Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=` (yielding 0 or 1)
/// * Functions: `abs()`, `sqrt()`
pub fn build_ir(
    b: &mut IrBuilder,
    node: &Node,
    bindings: &Bindings,
) -> Result<StmtId, ConvertError> {
    match node.operator() {
        Operator::Add => fold(b, node, BinaryOp::Add, bindings),
        Operator::Mul => fold(b, node, BinaryOp::Mul, bindings),
        Operator::Sub => binary(b, node, BinaryOp::Sub, bindings),
        Operator::Div => binary(b, node, BinaryOp::Div, bindings),
        Operator::Mod => binary(b, node, BinaryOp::Mod, bindings),
        Operator::Eq => binary(b, node, BinaryOp::Eq, bindings),
        Operator::Neq => binary(b, node, BinaryOp::Ne, bindings),
        Operator::Lt => binary(b, node, BinaryOp::Lt, bindings),
        Operator::Leq => binary(b, node, BinaryOp::Le, bindings),
        Operator::Gt => binary(b, node, BinaryOp::Gt, bindings),
        Operator::Geq => binary(b, node, BinaryOp::Ge, bindings),
        Operator::Neg => {
            let operand = build_ir(b, single_child(node)?, bindings)?;
            Ok(b.unary(UnaryOp::Neg, operand)?)
        }
        Operator::Const { value } => match value {
            evalexpr::Value::Float(f) => Ok(b.constant(*f as f32)),
            evalexpr::Value::Int(i) => {
                let value = i32::try_from(*i)
                    .map_err(|_| ConvertError::ConstOperator(format!("{i} does not fit in i32")))?;
                Ok(b.constant(value))
            }
            _ => Err(ConvertError::ConstOperator(format!("{:?}", value))),
        },
        Operator::VariableIdentifierRead { identifier } => {
            if *identifier == bindings.loop_var_name {
                return Ok(bindings.index(b));
            }
            let field = *bindings
                .fields
                .get(identifier.as_str())
                .ok_or_else(|| ConvertError::VariableNotFound(identifier.to_string()))?;
            let index = bindings.index(b);
            let ptr = b.global_ptr(field, index);
            Ok(b.global_load(ptr))
        }
        Operator::FunctionIdentifier { identifier } => {
            let op = match identifier.as_str() {
                "abs" => UnaryOp::Abs,
                "sqrt" => UnaryOp::Sqrt,
                _ => return Err(ConvertError::UnsupportedFunction(identifier.to_string())),
            };
            let operand = build_ir(b, single_child(node)?, bindings)?;
            Ok(b.unary(op, operand)?)
        }
        Operator::RootNode => build_ir(b, single_child(node)?, bindings),
        _ => Err(ConvertError::UnsupportedOperator(format!(
            "{:?}",
            node.operator()
        ))),
    }
}

fn single_child(node: &Node) -> Result<&Node, ConvertError> {
    match node.children() {
        [child] => Ok(child),
        children => Err(ConvertError::OperandCount(format!(
            "{:?} expects 1 operand, got {}",
            node.operator(),
            children.len()
        ))),
    }
}

fn binary(
    b: &mut IrBuilder,
    node: &Node,
    op: BinaryOp,
    bindings: &Bindings,
) -> Result<StmtId, ConvertError> {
    let [lhs, rhs] = node.children() else {
        return Err(ConvertError::OperandCount(format!(
            "{} expects 2 operands, got {}",
            op.name(),
            node.children().len()
        )));
    };
    let lhs = build_ir(b, lhs, bindings)?;
    let rhs = build_ir(b, rhs, bindings)?;
    Ok(b.binary(op, lhs, rhs)?)
}

/// Folds an n-ary `+` or `*` into a left-leaning chain of binary statements.
fn fold(
    b: &mut IrBuilder,
    node: &Node,
    op: BinaryOp,
    bindings: &Bindings,
) -> Result<StmtId, ConvertError> {
    let Some((first, rest)) = node.children().split_first() else {
        return Err(ConvertError::OperandCount(format!(
            "{} without operands",
            op.name()
        )));
    };
    let first = build_ir(b, first, bindings)?;
    rest.iter().try_fold(first, |acc, child| -> Result<StmtId, ConvertError> {
        let rhs = build_ir(b, child, bindings)?;
        Ok(b.binary(op, acc, rhs)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrFunction, StmtKind};
    use crate::types::{DataType, VectorType};
    use evalexpr::build_operator_tree;

    /// Lowers `expr` inside `for i in 0..4` with a single input field `x`.
    fn lower(expr: &str) -> Result<(IrFunction, StmtId), ConvertError> {
        let node: Node = build_operator_tree(expr).unwrap();
        let mut b = IrBuilder::new("test");
        let x = b.field("x", DataType::F32, 4);
        let mut result = None;
        b.range_for(0, 4, 1, |b, i| -> Result<(), ConvertError> {
            let bindings = Bindings {
                loop_var: i,
                loop_var_name: "i".to_string(),
                fields: HashMap::from([("x".to_string(), x)]),
            };
            result = Some(build_ir(b, &node, &bindings)?);
            Ok(())
        })?;
        let ir = b.finish();
        Ok((ir, result.unwrap()))
    }

    fn kinds(ir: &IrFunction) -> Vec<&'static str> {
        ir.stmt_ids()
            .map(|id| match ir[id].kind {
                StmtKind::Const { .. } => "const",
                StmtKind::Alloca => "alloca",
                StmtKind::LocalLoad { .. } => "local load",
                StmtKind::GlobalPtr { .. } => "global ptr",
                StmtKind::GlobalLoad { .. } => "global load",
                StmtKind::Binary { op, .. } => op.name(),
                StmtKind::Unary { op, .. } => op.name(),
                StmtKind::RangeFor { .. } => "for",
                _ => "other",
            })
            .collect()
    }

    #[test]
    fn test_index_and_input() {
        let (ir, result) = lower("i * 2 + x").unwrap();
        // The loop slot is created first, then the expression in evaluation order
        assert_eq!(
            kinds(&ir),
            vec![
                "alloca",
                "local load",
                "const",
                "mul",
                "local load",
                "global ptr",
                "global load",
                "add",
                "for"
            ]
        );
        assert_eq!(ir[result].ret_type, VectorType::scalar(DataType::F32));
    }

    #[test]
    fn test_literal_types() {
        let (ir, result) = lower("7 % 3").unwrap();
        assert_eq!(ir[result].ret_type, VectorType::scalar(DataType::I32));

        let (ir, result) = lower("i < 2.5").unwrap();
        assert_eq!(ir[result].ret_type, VectorType::scalar(DataType::I32));

        let (ir, result) = lower("sqrt(abs(-i))").unwrap();
        assert_eq!(ir[result].ret_type, VectorType::scalar(DataType::F32));
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(
            lower("y + 1"),
            Err(ConvertError::VariableNotFound(name)) if name == "y"
        ));
        assert!(matches!(
            lower("sin(i)"),
            Err(ConvertError::UnsupportedFunction(name)) if name == "sin"
        ));
        assert!(matches!(
            lower("i ^ 2"),
            Err(ConvertError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_integer_overflow() {
        assert!(matches!(
            lower("i + 10000000000"),
            Err(ConvertError::ConstOperator(_))
        ));
    }
}
