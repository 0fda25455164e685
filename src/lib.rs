pub mod geo;
pub mod io;
pub mod physics;
pub mod scene;
pub mod metrics;
pub mod coverage;
pub mod render;
pub mod cache;
pub mod engine;
pub mod export;
pub mod ui;

#[cfg(test)]
mod tests;
