pub mod gain;
pub mod params;
pub mod path_loss;
pub mod pattern;
