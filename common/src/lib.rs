pub mod kv;
pub mod logger;
pub mod time;
pub mod validation;
