pub mod config;
pub mod db;
pub mod metrics;
pub mod reload;
pub mod service;

pub mod error;
