//! Numerical back ends
//!
//! Everything here works on a [`LinearOperator`](crate::core::LinearOperator),
//! so the kernel matrix is only ever touched through matrix-vector products.

pub mod cg;
pub mod dense;
pub mod eigen;

pub use self::cg::*;
pub use self::eigen::*;
