pub mod price;
pub mod sink;
pub mod tracker;
pub mod types;
