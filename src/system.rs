//! Batches of kernels sharing one input list.
//!
//! A [`KernelSystem`] holds several kernels over the same extent. Their inputs
//! are merged into one sorted list, so every kernel takes the same arrays in
//! the same order. Each kernel owns its own IR; vectorizing and running the
//! batch processes the kernels in parallel with `rayon`, one pass instance
//! per kernel.
//!
//! # Example
//!
//! ```
//! use loop_vectorize::system::KernelSystem;
//!
//! let mut system = KernelSystem::new(
//!     vec!["2 * x + i".to_string(), "y - x".to_string()],
//!     4,
//!     2,
//! )
//! .unwrap();
//! system.vectorize().unwrap();
//!
//! // Inputs are sorted (x, y)
//! let x = [1.0f32; 4];
//! let y = [3.0f32; 4];
//! let results = system.run(&[x.as_slice(), y.as_slice()]).unwrap();
//! assert_eq!(results[0], vec![2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(results[1], vec![2.0; 4]);
//! ```

use rayon::prelude::*;
use tracing::debug;

use crate::errors::KernelError;
use crate::kernel::{extract_all_symbols, Kernel};

/// Several kernels evaluated over the same inputs.
#[derive(Debug, Clone)]
pub struct KernelSystem {
    /// The expression strings of the kernels
    pub sources: Vec<String>,
    /// Inputs in sorted order, shared by every kernel
    pub sorted_inputs: Vec<String>,
    kernels: Vec<Kernel>,
}

impl KernelSystem {
    /// Creates a system from expression strings.
    ///
    /// # Arguments
    /// * `sources` - One expression per kernel
    /// * `extent` - Loop extent and input length shared by all kernels
    /// * `vectorize` - Vectorization factor of every kernel's loop
    pub fn new(sources: Vec<String>, extent: usize, vectorize: usize) -> Result<Self, KernelError> {
        let sorted_inputs = extract_all_symbols(&sources)?;
        let kernels = sources
            .par_iter()
            .map(|source| Kernel::from_inputs(source.clone(), &sorted_inputs, extent, vectorize))
            .collect::<Result<Vec<_>, KernelError>>()?;

        Ok(Self {
            sources,
            sorted_inputs,
            kernels,
        })
    }

    /// Vectorizes every kernel.
    ///
    /// Stops at the first failing kernel; kernels that failed keep their scalar IR.
    pub fn vectorize(&mut self) -> Result<(), KernelError> {
        self.kernels.par_iter_mut().try_for_each(Kernel::vectorize)?;
        debug!(kernels = self.kernels.len(), "vectorized kernel system");
        Ok(())
    }

    /// Runs every kernel on the same inputs and returns one output array per kernel.
    pub fn run(&self, inputs: &[&[f32]]) -> Result<Vec<Vec<f32>>, KernelError> {
        self.kernels
            .par_iter()
            .map(|kernel| kernel.run(inputs))
            .collect()
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
