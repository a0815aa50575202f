//! Arena-backed intermediate representation.
//!
//! Every statement and block of a function lives in the [`IrFunction`] that
//! owns it and is addressed through a copyable handle:
//!
//! - [`StmtId`] indexes a [`Stmt`]
//! - [`BlockId`] indexes a [`Block`], an ordered list of statement handles
//! - [`FieldId`] indexes a [`Field`], an external storage location
//!
//! Blocks own their members: a statement appears in at most one block, and
//! its position there is its program order. Every other reference between
//! statements (operands, local addresses, a loop's induction slot) is a plain
//! handle and carries no ownership, so rewriting one statement never
//! invalidates another.
//!
//! # Statement kinds
//! - Values: `Const`, `LocalLoad`, `GlobalLoad`, `Binary`, `Unary`
//! - Storage: `Alloca`, `LocalStore`, `GlobalPtr`, `GlobalStore`
//! - Control flow: `If`, `RangeFor`, `While`, `WhileControl`

use std::fmt;
use std::ops::{Index, IndexMut};

use colored::Colorize;
use itertools::Itertools;

use crate::types::{DataType, LaneAttribute, TypedConstant, VectorType};

/// Handle of a statement inside its [`IrFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(u32);

/// Handle of a block inside its [`IrFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

/// Handle of an external storage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// One lane of a local load: which slot to read, and which lane of it.
///
/// `offset` only matters when the slot itself is vector-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalAddress {
    pub var: StmtId,
    pub offset: usize,
}

impl LocalAddress {
    pub fn new(var: StmtId, offset: usize) -> Self {
        Self { var, offset }
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.var, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    /// Comparisons yield an `i32` mask regardless of their operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Lt => "cmp_lt",
            BinaryOp::Le => "cmp_le",
            BinaryOp::Gt => "cmp_gt",
            BinaryOp::Ge => "cmp_ge",
            BinaryOp::Eq => "cmp_eq",
            BinaryOp::Ne => "cmp_ne",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
        }
    }
}

/// The operation a statement performs.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Literal values, one per lane
    Const { values: LaneAttribute<TypedConstant> },
    /// Declares a mutable local slot; its width is the slot's lane count
    Alloca,
    /// Reads local slots; entry `n` of `ptr` feeds lane `n`
    LocalLoad { ptr: LaneAttribute<LocalAddress> },
    /// Overwrites the local slot `ptr` with `data`
    LocalStore { ptr: StmtId, data: StmtId },
    /// Addresses element `index` of a storage field, one field handle per lane
    GlobalPtr {
        snodes: LaneAttribute<FieldId>,
        index: StmtId,
    },
    /// Reads through a `GlobalPtr`
    GlobalLoad { ptr: StmtId },
    /// Writes `data` through a `GlobalPtr`
    GlobalStore { ptr: StmtId, data: StmtId },
    Binary {
        op: BinaryOp,
        lhs: StmtId,
        rhs: StmtId,
    },
    Unary { op: UnaryOp, operand: StmtId },
    If {
        cond: StmtId,
        true_block: Option<BlockId>,
        false_block: Option<BlockId>,
    },
    /// Bounded loop over `begin..end`.
    ///
    /// `loop_var` is an `Alloca` owned by the loop itself, not by any block.
    /// `vectorize` is the number of iterations fused into one vector step.
    /// `widened` is set once the vectorizer has widened the body.
    RangeFor {
        loop_var: StmtId,
        begin: i32,
        end: i32,
        vectorize: usize,
        widened: bool,
        body: BlockId,
    },
    /// Unbounded loop; exits through a `WhileControl` in its body
    While { body: BlockId },
    /// Leaves the innermost `While` when `cond` is false
    WhileControl { cond: StmtId },
}

/// A single IR statement: what it does and the type of what it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub ret_type: VectorType,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(kind: StmtKind, ret_type: VectorType) -> Self {
        Self { ret_type, kind }
    }

    /// Constant whose type is taken from its first value.
    pub fn constant(values: LaneAttribute<TypedConstant>) -> Self {
        let dtype = values.first().map_or(DataType::I32, |value| value.dtype());
        let width = values.len();
        Self::new(StmtKind::Const { values }, VectorType::new(dtype, width))
    }

    /// Binary operation with an unassigned type; run the type checker on it.
    pub fn binary(op: BinaryOp, lhs: StmtId, rhs: StmtId) -> Self {
        Self::new(StmtKind::Binary { op, lhs, rhs }, VectorType::unknown())
    }

    pub fn unary(op: UnaryOp, operand: StmtId) -> Self {
        Self::new(StmtKind::Unary { op, operand }, VectorType::unknown())
    }

    pub fn width(&self) -> usize {
        self.ret_type.width
    }

    /// Statements this one reads, in a fixed order.
    pub fn operands(&self) -> Vec<StmtId> {
        match &self.kind {
            StmtKind::Const { .. } | StmtKind::Alloca => Vec::new(),
            StmtKind::LocalLoad { ptr } => ptr.iter().map(|address| address.var).collect(),
            StmtKind::LocalStore { ptr, data } | StmtKind::GlobalStore { ptr, data } => {
                vec![*ptr, *data]
            }
            StmtKind::GlobalPtr { index, .. } => vec![*index],
            StmtKind::GlobalLoad { ptr } => vec![*ptr],
            StmtKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            StmtKind::Unary { operand, .. } => vec![*operand],
            StmtKind::If { cond, .. } | StmtKind::WhileControl { cond } => vec![*cond],
            StmtKind::RangeFor { .. } | StmtKind::While { .. } => Vec::new(),
        }
    }

    /// Mutable view of the same handles [`operands`](Self::operands) returns.
    pub fn operands_mut(&mut self) -> Vec<&mut StmtId> {
        match &mut self.kind {
            StmtKind::Const { .. } | StmtKind::Alloca => Vec::new(),
            StmtKind::LocalLoad { ptr } => ptr.iter_mut().map(|address| &mut address.var).collect(),
            StmtKind::LocalStore { ptr, data } | StmtKind::GlobalStore { ptr, data } => {
                vec![ptr, data]
            }
            StmtKind::GlobalPtr { index, .. } => vec![index],
            StmtKind::GlobalLoad { ptr } => vec![ptr],
            StmtKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            StmtKind::Unary { operand, .. } => vec![operand],
            StmtKind::If { cond, .. } | StmtKind::WhileControl { cond } => vec![cond],
            StmtKind::RangeFor { .. } | StmtKind::While { .. } => Vec::new(),
        }
    }

    /// Blocks owned by this statement.
    pub fn sub_blocks(&self) -> Vec<BlockId> {
        match &self.kind {
            StmtKind::If {
                true_block,
                false_block,
                ..
            } => true_block.iter().chain(false_block.iter()).copied().collect(),
            StmtKind::RangeFor { body, .. } | StmtKind::While { body } => vec![*body],
            _ => Vec::new(),
        }
    }
}

/// Ordered, owning sequence of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub statements: Vec<StmtId>,
}

/// External structured storage read and written through `GlobalPtr`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
    pub len: usize,
}

/// A function body together with the arena that owns all of its nodes.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub stmts: Vec<Stmt>,
    pub blocks: Vec<Block>,
    pub fields: Vec<Field>,
    pub root: BlockId,
    /// Set once the loop vectorizer has run over the whole function from its root block
    pub vectorized: bool,
}

impl IrFunction {
    /// Creates a function with an empty root block.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stmts: Vec::new(),
            blocks: vec![Block::default()],
            fields: Vec::new(),
            root: BlockId(0),
            vectorized: false,
        }
    }

    /// Adds a statement to the arena without placing it in any block.
    pub fn push_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn add_field(&mut self, name: impl Into<String>, dtype: DataType, len: usize) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(Field {
            name: name.into(),
            dtype,
            len,
        });
        id
    }

    pub fn field_by_name(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .map(|index| FieldId(index as u32))
    }

    pub fn append(&mut self, block: BlockId, stmt: StmtId) {
        self[block].statements.push(stmt);
    }

    /// Places `stmt` at `position` in `block`, shifting later members back.
    pub fn insert_at(&mut self, block: BlockId, position: usize, stmt: StmtId) {
        self[block].statements.insert(position, stmt);
    }

    /// Position of `stmt` in `block`.
    pub fn position(&self, block: BlockId, stmt: StmtId) -> Option<usize> {
        self[block].statements.iter().position(|&member| member == stmt)
    }

    /// Block that owns `stmt`, if any.
    pub fn owning_block(&self, stmt: StmtId) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.statements.contains(&stmt))
            .map(|index| BlockId(index as u32))
    }

    /// Statements that read `stmt`.
    pub fn users(&self, stmt: StmtId) -> Vec<StmtId> {
        self.stmts
            .iter()
            .enumerate()
            .filter(|(_, user)| user.operands().contains(&stmt))
            .map(|(index, _)| StmtId(index as u32))
            .collect()
    }

    /// Redirects every reader of `old` to `new`, except `new` itself.
    ///
    /// Returns the number of operands rewritten.
    pub fn replace_usages(&mut self, old: StmtId, new: StmtId) -> usize {
        let mut replaced = 0;
        for (index, stmt) in self.stmts.iter_mut().enumerate() {
            if index == new.index() {
                continue;
            }
            for operand in stmt.operands_mut() {
                if *operand == old {
                    *operand = new;
                    replaced += 1;
                }
            }
        }
        replaced
    }

    pub fn stmt_ids(&self) -> impl Iterator<Item = StmtId> {
        (0..self.stmts.len() as u32).map(StmtId)
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: BlockId, depth: usize) -> fmt::Result {
        for &stmt in &self[block].statements {
            self.fmt_stmt(f, stmt, depth)?;
        }
        Ok(())
    }

    fn fmt_stmt(&self, f: &mut fmt::Formatter<'_>, id: StmtId, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let stmt = &self[id];
        match &stmt.kind {
            StmtKind::If {
                cond,
                true_block,
                false_block,
            } => {
                writeln!(f, "{indent}{} {cond} {{", "if".magenta())?;
                if let Some(block) = true_block {
                    self.fmt_block(f, *block, depth + 1)?;
                }
                if let Some(block) = false_block {
                    writeln!(f, "{indent}}} {} {{", "else".magenta())?;
                    self.fmt_block(f, *block, depth + 1)?;
                }
                writeln!(f, "{indent}}}")
            }
            StmtKind::RangeFor {
                loop_var,
                begin,
                end,
                vectorize,
                widened,
                body,
            } => {
                let keyword = if *widened { "vectorized" } else { "vectorize" };
                writeln!(
                    f,
                    "{indent}{} {loop_var} in range({begin}, {end}) {} {vectorize} {{",
                    "for".magenta(),
                    keyword.magenta()
                )?;
                self.fmt_block(f, *body, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            StmtKind::While { body } => {
                writeln!(f, "{indent}{} {{", "while".magenta())?;
                self.fmt_block(f, *body, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            kind => {
                let id_str = id.to_string();
                write!(f, "{indent}{} : {} = ", id_str.as_str().cyan(), stmt.ret_type)?;
                match kind {
                    StmtKind::Const { values } => writeln!(f, "{} {values}", "const".bold()),
                    StmtKind::Alloca => writeln!(f, "{}", "alloca".bold()),
                    StmtKind::LocalLoad { ptr } => writeln!(f, "{} {ptr}", "local load".bold()),
                    StmtKind::LocalStore { ptr, data } => {
                        writeln!(f, "{} [{ptr} <- {data}]", "local store".bold())
                    }
                    StmtKind::GlobalPtr { snodes, index } => {
                        let names = snodes
                            .iter()
                            .map(|field| {
                                self.fields
                                    .get(field.index())
                                    .map_or("?", |field| field.name.as_str())
                            })
                            .join(", ");
                        writeln!(f, "{} [{names}], index = {index}", "global ptr".bold())
                    }
                    StmtKind::GlobalLoad { ptr } => writeln!(f, "{} {ptr}", "global load".bold()),
                    StmtKind::GlobalStore { ptr, data } => {
                        writeln!(f, "{} [{ptr} <- {data}]", "global store".bold())
                    }
                    StmtKind::Binary { op, lhs, rhs } => {
                        writeln!(f, "{} {lhs} {rhs}", op.name().bold())
                    }
                    StmtKind::Unary { op, operand } => writeln!(f, "{} {operand}", op.name().bold()),
                    StmtKind::WhileControl { cond } => {
                        writeln!(f, "{} {cond}", "while control".bold())
                    }
                    StmtKind::If { .. } | StmtKind::RangeFor { .. } | StmtKind::While { .. } => {
                        Ok(())
                    }
                }
            }
        }
    }
}

impl Index<StmtId> for IrFunction {
    type Output = Stmt;

    fn index(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }
}

impl IndexMut<StmtId> for IrFunction {
    fn index_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }
}

impl Index<BlockId> for IrFunction {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }
}

impl IndexMut<BlockId> for IrFunction {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }
}

impl Index<FieldId> for IrFunction {
    type Output = Field;

    fn index(&self, id: FieldId) -> &Field {
        &self.fields[id.index()]
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {{", "kernel".magenta(), self.name)?;
        self.fmt_block(f, self.root, 1)?;
        writeln!(f, "}}")
    }
}

/// Entry node handed to a pass: a whole block, or one statement in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrNode {
    Block(BlockId),
    Stmt(StmtId),
}

impl From<BlockId> for IrNode {
    fn from(block: BlockId) -> Self {
        IrNode::Block(block)
    }
}

impl From<StmtId> for IrNode {
    fn from(stmt: StmtId) -> Self {
        IrNode::Stmt(stmt)
    }
}
