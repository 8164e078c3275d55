mod init;
mod span;
mod trace_id;

pub use init::init_logger;
pub use span::{annotate_tier, child_span, root_span, warn_if_slow};
pub use trace_id::TraceId;
