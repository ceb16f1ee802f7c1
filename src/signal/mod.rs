pub mod angles;
pub mod series;
pub mod smooth;

pub use angles::{angle_deg, combined_angle, distance, side_angle, AngleKind, Side};
pub use series::{AngleBank, AngleSeries};
pub use smooth::KeypointSmoother;
