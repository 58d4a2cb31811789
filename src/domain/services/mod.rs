pub mod geo_math;

pub use geo_math::{haversine_km, CoarseWindow};
