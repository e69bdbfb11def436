//! # rustynn: modular feed-forward neural networks in Rust
//!
//! **rustynn** builds classifiers out of layers that each expose an explicit
//! forward/backward pair over `ndarray` arrays. There is no autograd tape:
//! every forward returns a typed cache that its backward consumes, and the
//! networks in [`classifiers`] chain those calls by hand.
//!
//! ## Usage Example
//!
//! ```
//! use ndarray::ArrayD;
//! use rustynn::classifiers::{Classifier, FullyConnectedConfig, FullyConnectedNet, LossOutput};
//!
//! let config = FullyConnectedConfig::new(vec![20, 30])
//!     .with_input_dim(15)
//!     .with_num_classes(4)
//!     .with_batchnorm(true)
//!     .with_init_seed(0);
//! let mut net = FullyConnectedNet::new(config)?;
//!
//! let x = ArrayD::from_elem(vec![2, 15], 0.1);
//! if let LossOutput::Training { loss, grads } = net.loss(&x, Some(&[0, 3][..]))? {
//!     assert!(loss > 0.0);
//!     assert_eq!(grads.len(), net.params().len());
//! }
//! let scores = net.scores(&x)?;
//! assert_eq!(scores.dim(), (2, 4));
//! # Ok::<(), rustynn::Error>(())
//! ```

pub mod classifiers;
pub mod error;
pub mod losses;
pub mod metrics;
pub mod mode;
pub mod nn;
pub mod params;

pub use error::{Error, Result};
pub use mode::Mode;
pub use params::{GradientStore, ParamKind, ParamSet, ParameterStore};
