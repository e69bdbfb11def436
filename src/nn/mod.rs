//! # Layers
//!
//! Every layer is a pair of free functions. `forward` takes concrete arrays
//! and returns its output together with a typed cache; `backward` consumes
//! that cache with the upstream gradient and returns the gradient for the
//! input plus one gradient per parameter. The input gradient always has the
//! exact shape of the forward input.
//!
//! ## Available Layers
//!
//! ### Core
//! - [`affine`]: fully connected layer over a flattened input
//! - [`conv`]: naive 2D convolution with stride and zero padding
//! - [`pooling`]: naive 2D max pooling
//!
//! ### Normalization and regularization
//! - [`batchnorm`]: batch normalization, vanilla and spatial
//! - [`dropout`]: inverted dropout
//!
//! ### Activations
//! - [`activations`]: rectified linear unit
//!
//! ### Fused blocks
//! - [`sandwich`]: affine-relu, affine-batchnorm-relu, conv-relu, conv-relu-pool
//!
//! ## Example
//!
//! ```
//! use ndarray::{Array1, Array2, ArrayD};
//! use rustynn::nn::sandwich::{affine_relu_backward, affine_relu_forward};
//!
//! let x = ArrayD::from_elem(vec![2, 3], 1.0);
//! let w = Array2::from_elem((3, 4), 0.5);
//! let b = Array1::zeros(4);
//!
//! let (out, cache) = affine_relu_forward(&x, w.view(), b.view())?;
//! let (dx, dw, db) = affine_relu_backward(&ArrayD::ones(vec![2, 4]), cache)?;
//! assert_eq!(out.shape(), &[2, 4]);
//! assert_eq!(dx.shape(), x.shape());
//! assert_eq!((dw.dim(), db.len()), ((3, 4), 4));
//! # Ok::<(), rustynn::Error>(())
//! ```

pub mod activations;
pub mod affine;
pub mod batchnorm;
pub mod conv;
pub mod dropout;
pub mod pooling;
pub mod sandwich;

pub use activations::{relu_backward, relu_forward, ReluCache};
pub use affine::AffineCache;
pub use batchnorm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, spatial_batchnorm_backward,
    spatial_batchnorm_forward, BatchNormCache, BatchNormPass, BatchNormState, SpatialBatchNormCache,
};
pub use conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvParam};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache, DropoutConfig};
pub use pooling::{max_pool_backward_naive, max_pool_forward_naive, PoolCache, PoolParam};
