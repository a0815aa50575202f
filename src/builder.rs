//! Construction of IR functions.
//!
//! [`IrBuilder`] owns the function under construction and an insertion
//! cursor. Every emitted statement is appended to the block under the cursor;
//! nested blocks (`if`, `range_for`, `while`) are filled by a closure while the
//! cursor temporarily points into them.
//!
//! Everything the builder emits is scalar (width 1) unless asked otherwise,
//! which is the shape the loop vectorizer expects as input.

use crate::errors::TypeCheckError;
use crate::ir::{
    BinaryOp, BlockId, FieldId, IrFunction, LocalAddress, Stmt, StmtId, StmtKind, UnaryOp,
};
use crate::typecheck::typecheck;
use crate::types::{DataType, LaneAttribute, TypedConstant, VectorType};

pub struct IrBuilder {
    func: IrFunction,
    cursor: BlockId,
}

impl IrBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let func = IrFunction::new(name);
        let cursor = func.root;
        Self { func, cursor }
    }

    /// Declares an external storage field.
    pub fn field(&mut self, name: impl Into<String>, dtype: DataType, len: usize) -> FieldId {
        self.func.add_field(name, dtype, len)
    }

    pub fn ir(&self) -> &IrFunction {
        &self.func
    }

    pub fn dtype_of(&self, stmt: StmtId) -> DataType {
        self.func[stmt].ret_type.dtype
    }

    pub fn finish(self) -> IrFunction {
        self.func
    }

    fn emit(&mut self, stmt: Stmt) -> StmtId {
        let id = self.func.push_stmt(stmt);
        self.func.append(self.cursor, id);
        id
    }

    /// Fills a fresh block through `build`, restoring the cursor afterwards.
    fn nested<E>(
        &mut self,
        build: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<BlockId, E> {
        let block = self.func.new_block();
        let saved = std::mem::replace(&mut self.cursor, block);
        let result = build(self);
        self.cursor = saved;
        result.map(|()| block)
    }

    pub fn constant(&mut self, value: impl Into<TypedConstant>) -> StmtId {
        self.emit(Stmt::constant(LaneAttribute::splat(value.into())))
    }

    /// Constant with one value per lane.
    pub fn constant_lanes(&mut self, values: Vec<TypedConstant>) -> StmtId {
        self.emit(Stmt::constant(LaneAttribute::new(values)))
    }

    pub fn alloca(&mut self, dtype: DataType) -> StmtId {
        self.alloca_vector(dtype, 1)
    }

    /// Local slot holding `width` lanes.
    pub fn alloca_vector(&mut self, dtype: DataType, width: usize) -> StmtId {
        self.emit(Stmt::new(StmtKind::Alloca, VectorType::new(dtype, width)))
    }

    /// Reads lane 0 of `var`.
    pub fn local_load(&mut self, var: StmtId) -> StmtId {
        self.local_load_lanes(vec![LocalAddress::new(var, 0)])
    }

    /// Load whose lane `n` reads `ptr[n]`. The element type is taken from the first slot.
    pub fn local_load_lanes(&mut self, ptr: Vec<LocalAddress>) -> StmtId {
        let dtype = ptr
            .first()
            .map_or(DataType::Unknown, |address| self.dtype_of(address.var));
        let ret_type = VectorType::new(dtype, ptr.len());
        self.emit(Stmt::new(
            StmtKind::LocalLoad {
                ptr: LaneAttribute::new(ptr),
            },
            ret_type,
        ))
    }

    pub fn local_store(&mut self, ptr: StmtId, data: StmtId) -> StmtId {
        self.emit(Stmt::new(
            StmtKind::LocalStore { ptr, data },
            VectorType::void(),
        ))
    }

    pub fn global_ptr(&mut self, field: FieldId, index: StmtId) -> StmtId {
        let dtype = self.func[field].dtype;
        self.emit(Stmt::new(
            StmtKind::GlobalPtr {
                snodes: LaneAttribute::splat(field),
                index,
            },
            VectorType::scalar(dtype),
        ))
    }

    pub fn global_load(&mut self, ptr: StmtId) -> StmtId {
        let dtype = self.dtype_of(ptr);
        self.emit(Stmt::new(
            StmtKind::GlobalLoad { ptr },
            VectorType::scalar(dtype),
        ))
    }

    pub fn global_store(&mut self, ptr: StmtId, data: StmtId) -> StmtId {
        self.emit(Stmt::new(
            StmtKind::GlobalStore { ptr, data },
            VectorType::void(),
        ))
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: StmtId,
        rhs: StmtId,
    ) -> Result<StmtId, TypeCheckError> {
        let stmt = self.emit(Stmt::binary(op, lhs, rhs));
        typecheck(&mut self.func, stmt)?;
        Ok(stmt)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: StmtId) -> Result<StmtId, TypeCheckError> {
        let stmt = self.emit(Stmt::unary(op, operand));
        typecheck(&mut self.func, stmt)?;
        Ok(stmt)
    }

    pub fn if_then<E>(
        &mut self,
        cond: StmtId,
        then: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<StmtId, E> {
        let true_block = self.nested(then)?;
        Ok(self.emit_if(cond, Some(true_block), None))
    }

    pub fn if_then_else<E>(
        &mut self,
        cond: StmtId,
        then: impl FnOnce(&mut Self) -> Result<(), E>,
        otherwise: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<StmtId, E> {
        let true_block = self.nested(then)?;
        let false_block = self.nested(otherwise)?;
        Ok(self.emit_if(cond, Some(true_block), Some(false_block)))
    }

    fn emit_if(
        &mut self,
        cond: StmtId,
        true_block: Option<BlockId>,
        false_block: Option<BlockId>,
    ) -> StmtId {
        self.emit(Stmt::new(
            StmtKind::If {
                cond,
                true_block,
                false_block,
            },
            VectorType::void(),
        ))
    }

    /// Bounded loop over `begin..end` fusing `vectorize` iterations per step.
    ///
    /// `body` receives the loop's `i32` induction slot. The slot belongs to the
    /// loop statement and is not placed in any block.
    pub fn range_for<E>(
        &mut self,
        begin: i32,
        end: i32,
        vectorize: usize,
        body: impl FnOnce(&mut Self, StmtId) -> Result<(), E>,
    ) -> Result<StmtId, E> {
        let loop_var = self.func.push_stmt(Stmt::new(
            StmtKind::Alloca,
            VectorType::scalar(DataType::I32),
        ));
        let body = self.nested(|b| body(b, loop_var))?;
        Ok(self.emit(Stmt::new(
            StmtKind::RangeFor {
                loop_var,
                begin,
                end,
                vectorize,
                widened: false,
                body,
            },
            VectorType::void(),
        )))
    }

    pub fn while_loop<E>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<StmtId, E> {
        let body = self.nested(body)?;
        Ok(self.emit(Stmt::new(StmtKind::While { body }, VectorType::void())))
    }

    /// Exits the enclosing `while` once `cond` is false.
    pub fn while_control(&mut self, cond: StmtId) -> StmtId {
        self.emit(Stmt::new(
            StmtKind::WhileControl { cond },
            VectorType::void(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_restore_cursor() {
        let mut b = IrBuilder::new("test");
        let first = b.constant(1);
        let mut inner = None;
        let lp = b
            .range_for(0, 4, 2, |b, i| -> Result<(), TypeCheckError> {
                let load = b.local_load(i);
                inner = Some(b.binary(BinaryOp::Add, load, load)?);
                Ok(())
            })
            .unwrap();
        let last = b.constant(2);
        let ir = b.finish();

        assert_eq!(ir[ir.root].statements, vec![first, lp, last]);
        let body = match ir[lp].kind {
            StmtKind::RangeFor { body, .. } => body,
            _ => unreachable!(),
        };
        assert_eq!(ir[body].statements.len(), 2);
        assert_eq!(ir[inner.unwrap()].ret_type, VectorType::scalar(DataType::I32));
    }

    #[test]
    fn test_failed_block_keeps_cursor() {
        let mut b = IrBuilder::new("test");
        let x = b.constant(1);
        let y = b.constant_lanes(vec![1.into(), 2.into()]);
        let result = b.while_loop(|b| b.binary(BinaryOp::Add, x, y).map(|_| ()));
        assert!(result.is_err());

        let after = b.constant(3);
        let ir = b.finish();
        assert_eq!(ir[ir.root].statements, vec![x, y, after]);
    }

    #[test]
    fn test_loads_take_slot_type() {
        let mut b = IrBuilder::new("test");
        let field = b.field("x", DataType::F32, 4);
        let slot = b.alloca(DataType::F32);
        let load = b.local_load(slot);
        let index = b.constant(0);
        let ptr = b.global_ptr(field, index);
        let value = b.global_load(ptr);
        let ir = b.finish();

        assert_eq!(ir[load].ret_type, VectorType::scalar(DataType::F32));
        assert_eq!(ir[value].ret_type, VectorType::scalar(DataType::F32));
        assert_eq!(ir.field_by_name("x"), Some(field));
    }
}
