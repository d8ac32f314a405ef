//! Histogram intersection kernel machinery

pub mod feature_store;
pub mod histogram_intersection;
pub mod quantization;
pub mod sum;
pub mod traits;
pub mod transform;

pub use self::feature_store::*;
pub use self::histogram_intersection::*;
pub use self::quantization::*;
pub use self::sum::*;
pub use self::traits::*;
pub use self::transform::*;
