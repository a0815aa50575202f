//! Reference interpreter for IR functions.
//!
//! Executes a function lane by lane against a [`Storage`]. It is slow and
//! exists to check that a transformation keeps a program's meaning: run the
//! scalar function and its vectorized copy and compare the storage.
//!
//! A bounded loop steps by 1 until the vectorizer has widened it, and by its
//! vectorization factor afterwards. The loop's induction slot holds the
//! scalar index of the first lane of the current step. A bounded loop inside
//! a loop that steps by more than 1 is rejected, since its iterations cannot
//! be split across the outer lanes.

use std::collections::HashMap;

use tracing::trace;

use crate::errors::EvalError;
use crate::ir::{BinaryOp, BlockId, FieldId, IrFunction, StmtId, StmtKind, UnaryOp};
use crate::types::{DataType, TypedConstant};

/// Contents of every field of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    data: Vec<Vec<TypedConstant>>,
}

impl Storage {
    /// Zero-initialized storage for the fields declared by `ir`.
    pub fn new(ir: &IrFunction) -> Self {
        let data = ir
            .fields
            .iter()
            .map(|field| vec![TypedConstant::zero(field.dtype); field.len])
            .collect();
        Self { data }
    }

    pub fn field(&self, field: FieldId) -> &[TypedConstant] {
        &self.data[field.index()]
    }

    pub fn field_mut(&mut self, field: FieldId) -> &mut [TypedConstant] {
        &mut self.data[field.index()]
    }
}

/// Executes `ir` from its root block.
pub fn run(ir: &IrFunction, storage: &mut Storage) -> Result<(), EvalError> {
    let mut interpreter = Interpreter {
        ir,
        storage,
        values: HashMap::new(),
        pointers: HashMap::new(),
        slots: HashMap::new(),
        enclosing: None,
    };
    interpreter.exec_block(ir.root).map(|_| ())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Break,
}

struct Interpreter<'a> {
    ir: &'a IrFunction,
    storage: &'a mut Storage,
    values: HashMap<StmtId, Vec<TypedConstant>>,
    pointers: HashMap<StmtId, Vec<(FieldId, usize)>>,
    slots: HashMap<StmtId, Vec<TypedConstant>>,
    /// Innermost running loop that steps by more than one iteration
    enclosing: Option<StmtId>,
}

impl Interpreter<'_> {
    fn exec_block(&mut self, block: BlockId) -> Result<Flow, EvalError> {
        for &stmt in &self.ir[block].statements {
            if self.exec_stmt(stmt)? == Flow::Break {
                return Ok(Flow::Break);
            }
        }
        Ok(Flow::Next)
    }

    fn value(&self, stmt: StmtId) -> Result<&[TypedConstant], EvalError> {
        self.values
            .get(&stmt)
            .map(Vec::as_slice)
            .ok_or(EvalError::Unevaluated(stmt))
    }

    /// Values of `operand`, checked to have `width` lanes.
    fn lanes(&self, user: StmtId, operand: StmtId, width: usize) -> Result<&[TypedConstant], EvalError> {
        let lanes = self.value(operand)?;
        if lanes.len() != width {
            return Err(EvalError::WidthMismatch {
                stmt: user,
                expected: width,
                got: lanes.len(),
            });
        }
        Ok(lanes)
    }

    /// Lane-uniform truth value of a condition.
    fn uniform(&self, cond: StmtId) -> Result<bool, EvalError> {
        let lanes = self.value(cond)?;
        let first = lanes.first().is_some_and(|lane| lane.is_truthy());
        if lanes.iter().any(|lane| lane.is_truthy() != first) {
            return Err(EvalError::DivergentLanes(cond));
        }
        Ok(first)
    }

    fn exec_stmt(&mut self, id: StmtId) -> Result<Flow, EvalError> {
        let ir = self.ir;
        let stmt = &ir[id];
        let width = stmt.width();
        match &stmt.kind {
            StmtKind::Const { values } => {
                self.values.insert(id, values.to_vec());
            }
            StmtKind::Alloca => {
                self.slots
                    .insert(id, vec![TypedConstant::zero(stmt.ret_type.dtype); width]);
            }
            StmtKind::LocalLoad { ptr } => {
                let lanes = ptr
                    .iter()
                    .map(|address| {
                        let slot = self
                            .slots
                            .get(&address.var)
                            .ok_or(EvalError::Unevaluated(address.var))?;
                        slot.get(address.offset).copied().ok_or(EvalError::LaneOutOfRange {
                            stmt: id,
                            var: address.var,
                            offset: address.offset,
                            width: slot.len(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.values.insert(id, lanes);
            }
            StmtKind::LocalStore { ptr, data } => {
                let dtype = ir[*ptr].ret_type.dtype;
                let slot_width = self
                    .slots
                    .get(ptr)
                    .ok_or(EvalError::Unevaluated(*ptr))?
                    .len();
                let data: Vec<_> = self
                    .lanes(id, *data, slot_width)?
                    .iter()
                    .map(|lane| lane.cast(dtype))
                    .collect();
                self.slots.insert(*ptr, data);
            }
            StmtKind::GlobalPtr { snodes, index } => {
                let index_lanes = self.value(*index)?;
                let broadcast = index_lanes.len() == 1;
                if !broadcast && index_lanes.len() != snodes.len() {
                    return Err(EvalError::WidthMismatch {
                        stmt: id,
                        expected: snodes.len(),
                        got: index_lanes.len(),
                    });
                }
                let addresses = snodes
                    .iter()
                    .enumerate()
                    .map(|(lane, &field)| {
                        let index = index_lanes[if broadcast { 0 } else { lane }].as_i32();
                        let len = ir[field].len;
                        match usize::try_from(index) {
                            Ok(offset) if offset < len => Ok((field, offset)),
                            _ => Err(EvalError::OutOfBounds {
                                field: ir[field].name.clone(),
                                index,
                                len,
                            }),
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.pointers.insert(id, addresses);
            }
            StmtKind::GlobalLoad { ptr } => {
                let lanes = self
                    .pointer(*ptr)?
                    .iter()
                    .map(|&(field, offset)| self.storage.field(field)[offset])
                    .collect();
                self.values.insert(id, lanes);
            }
            StmtKind::GlobalStore { ptr, data } => {
                let addresses = self.pointer(*ptr)?.to_vec();
                let data = self.lanes(id, *data, addresses.len())?.to_vec();
                for ((field, offset), lane) in addresses.into_iter().zip(data) {
                    let dtype = ir[field].dtype;
                    self.storage.field_mut(field)[offset] = lane.cast(dtype);
                }
            }
            StmtKind::Binary { op, lhs, rhs } => {
                let lhs_lanes = self.value(*lhs)?;
                let rhs_lanes = self.lanes(id, *rhs, lhs_lanes.len())?;
                let lanes = lhs_lanes
                    .iter()
                    .zip(rhs_lanes)
                    .map(|(&a, &b)| apply_binary(*op, a, b).ok_or(EvalError::DivisionByZero(id)))
                    .collect::<Result<Vec<_>, _>>()?;
                self.values.insert(id, lanes);
            }
            StmtKind::Unary { op, operand } => {
                let lanes = self
                    .value(*operand)?
                    .iter()
                    .map(|&value| apply_unary(*op, value))
                    .collect();
                self.values.insert(id, lanes);
            }
            StmtKind::If {
                cond,
                true_block,
                false_block,
            } => {
                let branch = if self.uniform(*cond)? {
                    true_block
                } else {
                    false_block
                };
                if let Some(block) = branch {
                    return self.exec_block(*block);
                }
            }
            StmtKind::RangeFor {
                loop_var,
                begin,
                end,
                vectorize,
                body,
                widened,
            } => {
                if let Some(outer) = self.enclosing {
                    return Err(EvalError::NestedVectorizedLoop { outer, inner: id });
                }
                let step = if *widened { (*vectorize).max(1) } else { 1 };
                let trip_count = i64::from(*end) - i64::from(*begin);
                if trip_count > 0 && trip_count % step as i64 != 0 {
                    return Err(EvalError::TripCount {
                        begin: *begin,
                        end: *end,
                        step,
                    });
                }
                trace!(%id, begin, end, step, "running bounded loop");
                if step > 1 {
                    self.enclosing = Some(id);
                }
                let result = self.run_range(*loop_var, *begin..*end, step, *body);
                self.enclosing = None;
                result?;
            }
            StmtKind::While { body } => while self.exec_block(*body)? == Flow::Next {},
            StmtKind::WhileControl { cond } => {
                if !self.uniform(*cond)? {
                    return Ok(Flow::Break);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn run_range(
        &mut self,
        loop_var: StmtId,
        range: std::ops::Range<i32>,
        step: usize,
        body: BlockId,
    ) -> Result<(), EvalError> {
        for base in range.step_by(step) {
            self.slots.insert(loop_var, vec![TypedConstant::I32(base)]);
            if self.exec_block(body)? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn pointer(&self, stmt: StmtId) -> Result<&[(FieldId, usize)], EvalError> {
        match self.pointers.get(&stmt) {
            Some(addresses) => Ok(addresses),
            None if matches!(self.ir[stmt].kind, StmtKind::GlobalPtr { .. }) => {
                Err(EvalError::Unevaluated(stmt))
            }
            None => Err(EvalError::UnexpectedKind {
                stmt,
                expected: "storage pointer",
            }),
        }
    }
}

/// Lane-wise arithmetic; `None` on integer division by zero.
fn apply_binary(op: BinaryOp, a: TypedConstant, b: TypedConstant) -> Option<TypedConstant> {
    let dtype = a.dtype().promote(b.dtype()).unwrap_or(DataType::F32);
    if op.is_comparison() {
        let holds = match dtype {
            DataType::I32 => compare(op, a.as_i32(), b.as_i32()),
            _ => compare(op, a.as_f32(), b.as_f32()),
        };
        return Some(TypedConstant::I32(i32::from(holds)));
    }
    match dtype {
        DataType::I32 => {
            let (a, b) = (a.as_i32(), b.as_i32());
            let value = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.checked_div(b)?,
                BinaryOp::Mod => a.checked_rem(b)?,
                _ => return None,
            };
            Some(TypedConstant::I32(value))
        }
        _ => {
            let (a, b) = (a.as_f32(), b.as_f32());
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => return None,
            };
            Some(TypedConstant::F32(value))
        }
    }
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        _ => a != b,
    }
}

fn apply_unary(op: UnaryOp, value: TypedConstant) -> TypedConstant {
    match (op, value) {
        (UnaryOp::Neg, TypedConstant::I32(v)) => TypedConstant::I32(v.wrapping_neg()),
        (UnaryOp::Neg, TypedConstant::F32(v)) => TypedConstant::F32(-v),
        (UnaryOp::Abs, TypedConstant::I32(v)) => TypedConstant::I32(v.wrapping_abs()),
        (UnaryOp::Abs, TypedConstant::F32(v)) => TypedConstant::F32(v.abs()),
        (UnaryOp::Sqrt, value) => TypedConstant::F32(value.as_f32().sqrt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::errors::TypeCheckError;
    use crate::vectorize::{loop_vectorize, LoopVectorize};

    fn floats(storage: &Storage, field: FieldId) -> Vec<f32> {
        storage.field(field).iter().map(|v| v.as_f32()).collect()
    }

    /// `out[i] = i * i + offset`, with `offset` read from a local slot declared outside the loop
    fn squares(vectorize: usize) -> (IrFunction, FieldId) {
        let mut b = IrBuilder::new("squares");
        let out = b.field("out", DataType::I32, 8);
        let offset = b.alloca(DataType::I32);
        let ten = b.constant(10);
        b.local_store(offset, ten);
        b.range_for(0, 8, vectorize, |b, i| -> Result<(), TypeCheckError> {
            let index = b.local_load(i);
            let square = b.binary(BinaryOp::Mul, index, index)?;
            let offset = b.local_load(offset);
            let value = b.binary(BinaryOp::Add, square, offset)?;
            let target = b.local_load(i);
            let ptr = b.global_ptr(out, target);
            b.global_store(ptr, value);
            Ok(())
        })
        .unwrap();
        (b.finish(), out)
    }

    #[test]
    fn test_scalar_loop() {
        let (ir, out) = squares(4);
        let mut storage = Storage::new(&ir);
        run(&ir, &mut storage).unwrap();
        assert_eq!(
            floats(&storage, out),
            vec![10.0, 11.0, 14.0, 19.0, 26.0, 35.0, 46.0, 59.0]
        );
    }

    #[test]
    fn test_vectorized_loop_matches_scalar() {
        for vectorize in [1, 2, 4, 8] {
            let (scalar, out) = squares(vectorize);
            let mut expected = Storage::new(&scalar);
            run(&scalar, &mut expected).unwrap();

            let mut vectorized = scalar.clone();
            loop_vectorize(&mut vectorized).unwrap();
            let mut actual = Storage::new(&vectorized);
            run(&vectorized, &mut actual).unwrap();

            assert_eq!(floats(&actual, out), floats(&expected, out), "factor {vectorize}");
        }
    }

    #[test]
    fn test_trip_count_must_divide() {
        let mut b = IrBuilder::new("ragged");
        b.range_for(0, 6, 4, |b, i| -> Result<(), TypeCheckError> {
            b.local_load(i);
            Ok(())
        })
        .unwrap();
        let mut ir = b.finish();
        loop_vectorize(&mut ir).unwrap();

        let mut storage = Storage::new(&ir);
        assert_eq!(
            run(&ir, &mut storage),
            Err(EvalError::TripCount {
                begin: 0,
                end: 6,
                step: 4
            })
        );
    }

    /// `for i in 0..4 (vectorize 2) { field[i] = i }`
    fn store_index(b: &mut IrBuilder, field: FieldId) -> StmtId {
        b.range_for(0, 4, 2, |b, i| -> Result<(), TypeCheckError> {
            let index = b.local_load(i);
            let ptr = b.global_ptr(field, index);
            b.global_store(ptr, index);
            Ok(())
        })
        .unwrap()
    }

    #[test]
    fn test_only_visited_loop_steps_by_factor() {
        let mut b = IrBuilder::new("two_loops");
        let a = b.field("a", DataType::I32, 4);
        let c = b.field("c", DataType::I32, 4);
        let first = store_index(&mut b, a);
        store_index(&mut b, c);
        let scalar = b.finish();
        let mut expected = Storage::new(&scalar);
        run(&scalar, &mut expected).unwrap();

        let mut ir = scalar.clone();
        LoopVectorize::run(&mut ir, first).unwrap();
        let mut actual = Storage::new(&ir);
        run(&ir, &mut actual).unwrap();

        assert_eq!(floats(&actual, a), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(floats(&actual, c), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_nested_vectorized_loop_is_rejected() {
        let mut b = IrBuilder::new("nested");
        let out = b.field("out", DataType::I32, 4);
        let mut inner = None;
        let outer = b
            .range_for(0, 4, 2, |b, _| -> Result<(), TypeCheckError> {
                inner = Some(store_index(b, out));
                Ok(())
            })
            .unwrap();
        let mut ir = b.finish();
        loop_vectorize(&mut ir).unwrap();

        let mut storage = Storage::new(&ir);
        assert_eq!(
            run(&ir, &mut storage),
            Err(EvalError::NestedVectorizedLoop {
                outer,
                inner: inner.unwrap(),
            })
        );
    }

    #[test]
    fn test_vectorized_loop_inside_scalar_loop() {
        let mut b = IrBuilder::new("outer_scalar");
        let out = b.field("out", DataType::I32, 4);
        b.range_for(0, 3, 1, |b, _| -> Result<(), TypeCheckError> {
            store_index(b, out);
            Ok(())
        })
        .unwrap();
        store_index(&mut b, out);
        let mut ir = b.finish();
        loop_vectorize(&mut ir).unwrap();

        let mut storage = Storage::new(&ir);
        run(&ir, &mut storage).unwrap();
        assert_eq!(floats(&storage, out), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_while_and_branches() {
        // counter = 0; while counter < 5 { counter = counter + 1; if counter == 3 { hits = counter } }
        let mut b = IrBuilder::new("while");
        let counter = b.alloca(DataType::I32);
        let hits = b.alloca(DataType::I32);
        b.while_loop(|b| -> Result<(), TypeCheckError> {
            let current = b.local_load(counter);
            let limit = b.constant(5);
            let more = b.binary(BinaryOp::Lt, current, limit)?;
            b.while_control(more);
            let one = b.constant(1);
            let next = b.binary(BinaryOp::Add, current, one)?;
            b.local_store(counter, next);
            let three = b.constant(3);
            let hit = b.binary(BinaryOp::Eq, next, three)?;
            b.if_then(hit, |b| -> Result<(), TypeCheckError> {
                b.local_store(hits, next);
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
        let result = b.local_load(counter);
        let hit = b.local_load(hits);
        let ir = b.finish();

        let mut storage = Storage::new(&ir);
        let mut interpreter = Interpreter {
            ir: &ir,
            storage: &mut storage,
            values: HashMap::new(),
            pointers: HashMap::new(),
            slots: HashMap::new(),
            enclosing: None,
        };
        interpreter.exec_block(ir.root).unwrap();
        assert_eq!(interpreter.value(result).unwrap(), &[TypedConstant::I32(5)]);
        assert_eq!(interpreter.value(hit).unwrap(), &[TypedConstant::I32(3)]);
    }

    #[test]
    fn test_errors() {
        let mut b = IrBuilder::new("errors");
        let zero = b.constant(0);
        let one = b.constant(1);
        let quotient = b.binary(BinaryOp::Div, one, zero).unwrap();
        let ir = b.finish();
        let mut storage = Storage::new(&ir);
        assert_eq!(run(&ir, &mut storage), Err(EvalError::DivisionByZero(quotient)));

        let mut b = IrBuilder::new("bounds");
        let field = b.field("x", DataType::F32, 2);
        let index = b.constant(2);
        b.global_ptr(field, index);
        let ir = b.finish();
        let mut storage = Storage::new(&ir);
        assert_eq!(
            run(&ir, &mut storage),
            Err(EvalError::OutOfBounds {
                field: "x".to_string(),
                index: 2,
                len: 2
            })
        );
    }
}
