//! Loop vectorization.
//!
//! Widens every statement inside a bounded loop (`RangeFor`) by that loop's
//! vectorization factor, so that one execution of the body covers `factor`
//! consecutive iterations, one per lane.
//!
//! Per statement kind:
//! - **default**: result width is multiplied by the factor
//! - **Const**: values are replicated, `[a, b]` becomes `[a, b, a, b, ...]`
//! - **GlobalPtr**: storage descriptors are replicated the same way
//! - **Alloca**: the slot is widened, its content is not touched
//! - **LocalLoad**: the pointer list is replicated; loads of vector-valued
//!   slots get one lane offset per copy; a load of the loop's own induction
//!   variable is followed by `load + [0, 1, .., factor-1]` so every lane sees
//!   its own iteration index instead of a broadcast
//! - **If / While**: traversal only, with the enclosing loop's context
//! - **RangeFor**: its body is walked with the loop's own factor and
//!   induction variable; the context of the caller is left untouched
//!
//! The pass mutates the function in place. A function may be vectorized
//! once; running the pass again widens it again.

use tracing::{debug, trace};

use crate::errors::VectorizeError;
use crate::ir::{BinaryOp, BlockId, IrFunction, IrNode, Stmt, StmtId, StmtKind};
use crate::typecheck::typecheck;
use crate::types::{LaneAttribute, TypedConstant};

/// Context inherited from the nearest enclosing bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scope {
    vectorize: usize,
    loop_var: Option<StmtId>,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            vectorize: 1,
            loop_var: None,
        }
    }
}

/// One run of the vectorizer over one function.
pub struct LoopVectorize<'a> {
    ir: &'a mut IrFunction,
}

impl<'a> LoopVectorize<'a> {
    /// Vectorizes everything reachable from `root` with a fresh pass instance.
    ///
    /// Outside of any bounded loop the factor is 1, so only loop bodies change.
    /// Every visited loop is marked as widened; the function as a whole is
    /// marked as vectorized only when `root` is its root block.
    pub fn run(ir: &'a mut IrFunction, root: impl Into<IrNode>) -> Result<(), VectorizeError> {
        let mut pass = LoopVectorize { ir };
        let whole_function = match root.into() {
            IrNode::Block(block) => {
                pass.visit_block(block, Scope::default())?;
                block == pass.ir.root
            }
            IrNode::Stmt(stmt) => {
                let block = pass
                    .ir
                    .owning_block(stmt)
                    .ok_or(VectorizeError::Detached(stmt))?;
                pass.visit_stmt(block, stmt, Scope::default())?;
                false
            }
        };
        if whole_function {
            pass.ir.vectorized = true;
        }
        Ok(())
    }

    /// Visits the members of `block` as they were when the walk started.
    ///
    /// Statements inserted while walking are already in their final shape
    /// and are not visited again.
    fn visit_block(&mut self, block: BlockId, scope: Scope) -> Result<(), VectorizeError> {
        let statements = self.ir[block].statements.clone();
        for stmt in statements {
            self.visit_stmt(block, stmt, scope)?;
        }
        Ok(())
    }

    fn visit_stmt(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        scope: Scope,
    ) -> Result<(), VectorizeError> {
        match self.ir[stmt].kind {
            StmtKind::Const { .. } => self.visit_const(stmt, scope),
            StmtKind::GlobalPtr { .. } => self.visit_global_ptr(stmt, scope),
            StmtKind::Alloca => self.visit_alloca(stmt, scope),
            StmtKind::LocalLoad { .. } => self.visit_local_load(block, stmt, scope),
            StmtKind::If {
                true_block,
                false_block,
                ..
            } => self.visit_if(true_block, false_block, scope),
            StmtKind::RangeFor { .. } => self.visit_range_for(stmt),
            StmtKind::While { body } => self.visit_block(body, scope),
            StmtKind::LocalStore { .. }
            | StmtKind::GlobalLoad { .. }
            | StmtKind::GlobalStore { .. }
            | StmtKind::Binary { .. }
            | StmtKind::Unary { .. }
            | StmtKind::WhileControl { .. } => self.widen(stmt, scope),
        }
    }

    fn widen(&mut self, stmt: StmtId, scope: Scope) -> Result<(), VectorizeError> {
        self.ir[stmt].ret_type.width *= scope.vectorize;
        Ok(())
    }

    fn visit_const(&mut self, stmt: StmtId, scope: Scope) -> Result<(), VectorizeError> {
        if let StmtKind::Const { values } = &mut self.ir[stmt].kind {
            values.repeat(scope.vectorize);
        }
        self.widen(stmt, scope)
    }

    fn visit_global_ptr(&mut self, stmt: StmtId, scope: Scope) -> Result<(), VectorizeError> {
        if let StmtKind::GlobalPtr { snodes, .. } = &mut self.ir[stmt].kind {
            snodes.repeat(scope.vectorize);
        }
        self.widen(stmt, scope)
    }

    fn visit_alloca(&mut self, stmt: StmtId, scope: Scope) -> Result<(), VectorizeError> {
        self.widen(stmt, scope)
    }

    fn visit_local_load(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        scope: Scope,
    ) -> Result<(), VectorizeError> {
        let vectorize = scope.vectorize;
        if vectorize == 1 {
            return Ok(());
        }
        let mut ptr = match &self.ir[stmt].kind {
            StmtKind::LocalLoad { ptr } => ptr.clone(),
            _ => return Ok(()),
        };
        let Some(source) = ptr.first().map(|address| address.var) else {
            return self.widen(stmt, scope);
        };

        // Each copy of a vector-valued slot reads the lane of its own iteration,
        // which only works if the scalar load started at lane 0.
        let vector_source = self.ir[source].width() != 1;
        if vector_source {
            if let Some((lane, address)) = ptr.iter().enumerate().find(|(_, a)| a.offset != 0) {
                return Err(VectorizeError::NonZeroOffset {
                    stmt,
                    var: address.var,
                    lane,
                    offset: address.offset,
                });
            }
        }
        let same_source = ptr.iter().all(|address| address.var == source);

        let lanes = ptr.len();
        ptr.repeat(vectorize);
        if vector_source {
            for (position, address) in ptr.iter_mut().enumerate() {
                address.offset = position / lanes;
            }
        }
        let load = &mut self.ir[stmt];
        load.ret_type.width *= vectorize;
        load.kind = StmtKind::LocalLoad { ptr };

        if same_source && scope.loop_var == Some(source) {
            self.insert_lane_offsets(block, stmt, lanes, vectorize)?;
        }
        Ok(())
    }

    /// Follows a widened induction-variable load with `load + [0, .., 0, 1, .., vectorize-1]`
    /// and redirects all readers of the load to the sum.
    fn insert_lane_offsets(
        &mut self,
        block: BlockId,
        load: StmtId,
        lanes: usize,
        vectorize: usize,
    ) -> Result<StmtId, VectorizeError> {
        let offsets: LaneAttribute<TypedConstant> = (0..vectorize * lanes)
            .map(|position| TypedConstant::I32((position / lanes) as i32))
            .collect();
        let offsets = self.ir.push_stmt(Stmt::constant(offsets));
        let add = self.ir.push_stmt(Stmt::binary(BinaryOp::Add, load, offsets));
        typecheck(self.ir, add).map_err(|source| VectorizeError::TypeCheck { stmt: load, source })?;

        let replaced = self.ir.replace_usages(load, add);
        let position = self
            .ir
            .position(block, load)
            .ok_or(VectorizeError::NotInBlock { stmt: load, block })?;
        self.ir.insert_at(block, position + 1, offsets);
        self.ir.insert_at(block, position + 2, add);

        debug!(%load, %offsets, %add, replaced, "inserted lane offsets for loop index");
        Ok(add)
    }

    fn visit_if(
        &mut self,
        true_block: Option<BlockId>,
        false_block: Option<BlockId>,
        scope: Scope,
    ) -> Result<(), VectorizeError> {
        if let Some(block) = true_block {
            self.visit_block(block, scope)?;
        }
        if let Some(block) = false_block {
            self.visit_block(block, scope)?;
        }
        Ok(())
    }

    /// The body only sees this loop's factor and induction variable; the caller's
    /// scope is a separate value and stays as it was.
    fn visit_range_for(&mut self, stmt: StmtId) -> Result<(), VectorizeError> {
        let StmtKind::RangeFor {
            loop_var,
            vectorize,
            body,
            ref mut widened,
            ..
        } = self.ir[stmt].kind
        else {
            return Ok(());
        };
        *widened = true;
        let scope = Scope {
            vectorize,
            loop_var: Some(loop_var),
        };
        trace!(%loop_var, vectorize, "entering bounded loop");
        self.visit_block(body, scope)
    }
}

/// Vectorizes all bounded loops of `ir`, starting from its root block.
pub fn loop_vectorize(ir: &mut IrFunction) -> Result<(), VectorizeError> {
    let root = ir.root;
    LoopVectorize::run(ir, root)
}
