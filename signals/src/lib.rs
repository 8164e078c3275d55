pub mod dedup;
pub mod error;
pub mod model;
pub mod quality;
pub mod store;
