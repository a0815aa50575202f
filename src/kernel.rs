//! One-dimensional kernels built from expression strings.
//!
//! A [`Kernel`] turns an expression such as `"i * 2 + x"` into the IR of
//!
//! ```text
//! for i in range(0, extent) vectorize f {
//!     tmp = <expr>
//!     out[i] = tmp
//! }
//! ```
//!
//! where `i` is the loop index and every other identifier is an input array
//! of length `extent`. The result is staged through the loop-local slot `tmp`,
//! so after vectorization the kernel also reads a vector-valued local.
//!
//! # Example
//!
//! ```
//! use loop_vectorize::Kernel;
//!
//! let mut kernel = Kernel::new("i * 2 + x".to_string(), 8, 4).unwrap();
//! let x = [0.5f32; 8];
//! let scalar = kernel.run(&[&x]).unwrap();
//!
//! kernel.vectorize().unwrap();
//! assert_eq!(kernel.run(&[&x]).unwrap(), scalar);
//! ```
//!
//! # Input Handling
//!
//! Inputs are either extracted from the expression and sorted alphabetically
//! using `new()`, or given explicitly using `from_inputs()`. The arrays passed
//! to `run()` must follow that order.

use std::collections::HashSet;

use colored::Colorize;
use evalexpr::{build_operator_tree, Node, Operator};
use tracing::debug;

use crate::builder::IrBuilder;
use crate::convert::{build_ir, Bindings};
use crate::errors::KernelError;
use crate::interp::{self, Storage};
use crate::ir::{FieldId, IrFunction};
use crate::types::{DataType, TypedConstant};
use crate::vectorize::loop_vectorize;

/// Identifier of the loop index inside kernel expressions.
pub const LOOP_VAR: &str = "i";

/// Name of the output field every kernel writes.
pub const OUTPUT: &str = "out";

/// An expression evaluated for every index of `0..extent`.
#[derive(Clone)]
pub struct Kernel {
    source: String,
    extent: usize,
    vectorize: usize,
    ir: IrFunction,
    inputs: Vec<String>,
    fields: Vec<FieldId>,
    out: FieldId,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Kernel".cyan(), self.source)?;
        writeln!(f, "    {}: {:?}", "Inputs".cyan(), self.inputs)?;
        writeln!(f, "    {}: {}", "Extent".cyan(), self.extent)?;
        writeln!(f, "    {}: {}", "Vectorize".cyan(), self.vectorize)?;
        writeln!(f, "    {}: {}", "Vectorized".cyan(), self.ir.vectorized)?;
        writeln!(f, "}}")
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}: {}", "Kernel".cyan(), self.source)?;
        write!(f, "{}", self.ir)
    }
}

impl Kernel {
    /// Creates a kernel whose inputs are the identifiers of `source` other
    /// than the loop index, sorted alphabetically.
    ///
    /// # Arguments
    /// * `source` - The expression evaluated per index (e.g. "i * 2 + x")
    /// * `extent` - Number of loop iterations and length of every array
    /// * `vectorize` - Number of iterations the loop fuses once vectorized
    pub fn new(source: String, extent: usize, vectorize: usize) -> Result<Self, KernelError> {
        let node: Node = build_operator_tree(&source)?;
        let inputs = extract_symbols(&node);
        Self::build(source, &node, inputs, extent, vectorize)
    }

    /// Creates a kernel reading the arrays `inputs`, in that order.
    ///
    /// `inputs` may name arrays the expression does not read; every identifier
    /// the expression reads must be listed.
    pub fn from_inputs(
        source: String,
        inputs: &[String],
        extent: usize,
        vectorize: usize,
    ) -> Result<Self, KernelError> {
        let node: Node = build_operator_tree(&source)?;
        if let Some(missing) = extract_symbols(&node)
            .into_iter()
            .find(|name| !inputs.contains(name))
        {
            return Err(KernelError::VariableNotFound(missing));
        }
        Self::build(source, &node, inputs.to_vec(), extent, vectorize)
    }

    fn build(
        source: String,
        node: &Node,
        inputs: Vec<String>,
        extent: usize,
        vectorize: usize,
    ) -> Result<Self, KernelError> {
        if vectorize == 0 {
            return Err(KernelError::InvalidFactor(vectorize));
        }
        let end = i32::try_from(extent).map_err(|_| KernelError::ExtentTooLarge(extent))?;

        let mut b = IrBuilder::new(source.as_str());
        let fields: Vec<FieldId> = inputs
            .iter()
            .map(|name| b.field(name.as_str(), DataType::F32, extent))
            .collect();
        let out = b.field(OUTPUT, DataType::F32, extent);

        b.range_for(0, end, vectorize, |b, i| -> Result<(), KernelError> {
            let bindings = Bindings {
                loop_var: i,
                loop_var_name: LOOP_VAR.to_string(),
                fields: inputs.iter().cloned().zip(fields.iter().copied()).collect(),
            };
            let value = build_ir(b, node, &bindings)?;
            let dtype = b.dtype_of(value);
            let tmp = b.alloca(dtype);
            b.local_store(tmp, value);
            let result = b.local_load(tmp);
            let index = b.local_load(i);
            let ptr = b.global_ptr(out, index);
            b.global_store(ptr, result);
            Ok(())
        })?;

        let ir = b.finish();
        debug!(source = %source, extent, vectorize, statements = ir.stmts.len(), "built kernel");
        Ok(Self {
            source,
            extent,
            vectorize,
            ir,
            inputs,
            fields,
            out,
        })
    }

    /// Runs the loop vectorizer over the kernel.
    ///
    /// The pass works on a copy; if it fails the kernel keeps its scalar form.
    pub fn vectorize(&mut self) -> Result<(), KernelError> {
        if self.ir.vectorized {
            return Err(KernelError::AlreadyVectorized);
        }
        let mut ir = self.ir.clone();
        loop_vectorize(&mut ir)?;
        self.ir = ir;
        Ok(())
    }

    /// Interprets the kernel and returns the output array.
    ///
    /// # Arguments
    /// * `inputs` - One array of length `extent` per input, in input order
    pub fn run(&self, inputs: &[&[f32]]) -> Result<Vec<f32>, KernelError> {
        self.validate_inputs(inputs)?;

        let mut storage = Storage::new(&self.ir);
        for (&field, values) in self.fields.iter().zip(inputs) {
            for (slot, &value) in storage.field_mut(field).iter_mut().zip(values.iter()) {
                *slot = TypedConstant::F32(value);
            }
        }
        interp::run(&self.ir, &mut storage)?;

        Ok(storage
            .field(self.out)
            .iter()
            .map(|value| value.as_f32())
            .collect())
    }

    /// Returns the IR of the kernel.
    pub fn ir(&self) -> &IrFunction {
        &self.ir
    }

    /// Returns the input names in input order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn is_vectorized(&self) -> bool {
        self.ir.vectorized
    }

    fn validate_inputs(&self, inputs: &[&[f32]]) -> Result<(), KernelError> {
        if inputs.len() != self.inputs.len() {
            return Err(KernelError::InvalidInputLength {
                expected: self.inputs.len(),
                got: inputs.len(),
            });
        }
        for (name, values) in self.inputs.iter().zip(inputs) {
            if values.len() != self.extent {
                return Err(KernelError::InvalidFieldLength {
                    name: name.clone(),
                    expected: self.extent,
                    got: values.len(),
                });
            }
        }
        Ok(())
    }
}

/// Extracts the sorted input names of an expression tree, leaving out the loop index.
pub fn extract_symbols(node: &Node) -> Vec<String> {
    let mut symbols = HashSet::new();
    extract_symbols_from_node(node, &mut symbols);

    let mut symbols: Vec<String> = symbols.into_iter().collect();
    symbols.sort();
    symbols
}

/// Extracts and sorts the input names of several expressions, without duplicates.
pub fn extract_all_symbols(sources: &[String]) -> Result<Vec<String>, KernelError> {
    let mut all_symbols = HashSet::new();
    for source in sources {
        let node: Node = build_operator_tree(source)?;
        extract_symbols_from_node(&node, &mut all_symbols);
    }

    let mut all_symbols: Vec<String> = all_symbols.into_iter().collect();
    all_symbols.sort();
    Ok(all_symbols)
}

fn extract_symbols_from_node(node: &Node, symbols: &mut HashSet<String>) {
    match node.operator() {
        Operator::VariableIdentifierRead { identifier } => {
            if identifier != LOOP_VAR {
                symbols.insert(identifier.to_string());
            }
        }
        _ => {
            for child in node.children() {
                extract_symbols_from_node(child, symbols);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EvalError;

    fn ramp(scale: f32, len: usize) -> Vec<f32> {
        (0..len).map(|k| k as f32 * scale).collect()
    }

    #[test]
    fn test_kernel() {
        let kernel = Kernel::new("i * 2 + x".to_string(), 8, 4).unwrap();
        let x = ramp(10.0, 8);
        let result = kernel.run(&[&x]).unwrap();
        assert_eq!(result, vec![0.0, 12.0, 24.0, 36.0, 48.0, 60.0, 72.0, 84.0]);
    }

    #[test]
    fn test_vectorized_matches_scalar() {
        for source in ["i * 2 + x", "i * 0.5 + x", "abs(x - i) % 3", "(i < 3) * y + x"] {
            let mut kernel = Kernel::new(source.to_string(), 8, 4).unwrap();
            let inputs: Vec<Vec<f32>> = (0..kernel.inputs().len())
                .map(|k| ramp(k as f32 + 1.5, 8))
                .collect();
            let inputs: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();

            let scalar = kernel.run(&inputs).unwrap();
            kernel.vectorize().unwrap();
            assert!(kernel.is_vectorized());
            assert_eq!(kernel.run(&inputs).unwrap(), scalar, "{source}");
        }
    }

    #[test]
    fn test_comparison_kernel() {
        let mut kernel = Kernel::new("i < 3".to_string(), 4, 2).unwrap();
        kernel.vectorize().unwrap();
        assert!(kernel.inputs().is_empty());
        assert_eq!(kernel.run(&[]).unwrap(), vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_already_vectorized() {
        let mut kernel = Kernel::new("x".to_string(), 4, 2).unwrap();
        kernel.vectorize().unwrap();
        assert!(matches!(
            kernel.vectorize(),
            Err(KernelError::AlreadyVectorized)
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let kernel = Kernel::new("x + y".to_string(), 4, 2).unwrap();
        let x = [1.0f32; 4];
        assert!(matches!(
            kernel.run(&[&x]),
            Err(KernelError::InvalidInputLength {
                expected: 2,
                got: 1
            })
        ));
        let short = [1.0f32; 3];
        assert!(matches!(
            kernel.run(&[&x, &short]),
            Err(KernelError::InvalidFieldLength { ref name, expected: 4, got: 3 }) if name == "y"
        ));
    }

    #[test]
    fn test_invalid_factor() {
        assert!(matches!(
            Kernel::new("x".to_string(), 4, 0),
            Err(KernelError::InvalidFactor(0))
        ));
    }

    #[test]
    fn test_ragged_extent() {
        let mut kernel = Kernel::new("i".to_string(), 6, 4).unwrap();
        assert_eq!(kernel.run(&[]).unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        kernel.vectorize().unwrap();
        assert!(matches!(
            kernel.run(&[]),
            Err(KernelError::Eval(EvalError::TripCount {
                begin: 0,
                end: 6,
                step: 4
            }))
        ));
    }

    #[test]
    fn test_from_inputs() {
        let inputs = vec!["y".to_string(), "x".to_string(), "z".to_string()];
        let kernel = Kernel::from_inputs("x - y".to_string(), &inputs, 2, 2).unwrap();
        let (y, x, z) = ([1.0f32, 1.0], [5.0f32, 7.0], [0.0f32, 0.0]);
        let result = kernel.run(&[&y, &x, &z]).unwrap();
        assert_eq!(result, vec![4.0, 6.0]);

        assert!(matches!(
            Kernel::from_inputs("x + w".to_string(), &inputs, 2, 2),
            Err(KernelError::VariableNotFound(name)) if name == "w"
        ));
    }

    #[test]
    fn test_extract_symbols() {
        let node: Node = build_operator_tree("x + i * y + x").unwrap();
        assert_eq!(extract_symbols(&node), vec!["x".to_string(), "y".to_string()]);

        let sources = vec!["b + i".to_string(), "a * b".to_string()];
        let symbols = extract_all_symbols(&sources).unwrap();
        assert_eq!(symbols, vec!["a".to_string(), "b".to_string()]);
    }
}
