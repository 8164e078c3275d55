pub mod provider;
pub mod regime;
pub mod types;
