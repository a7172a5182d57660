pub mod smooth;
pub mod stabilizer;

pub use smooth::{LandmarkSmoother, SmootherBank};
pub use stabilizer::{LabelStabilizer, StabilizerLabel};
