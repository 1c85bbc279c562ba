//! Process-level plumbing: logging, metrics, signals, child processes and
//! dump files

pub mod dump;
pub mod interrupt;
pub mod isolation;
pub mod logging;
pub mod metrics;

pub use dump::{DumpCodec, DumpError};
pub use interrupt::{Activity, Delivery, Interrupts};
pub use isolation::{isolate_and_run, run_isolated, ChildStatus, ExitKind, Fault};
pub use logging::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
pub use metrics::{Counter, Phase, SessionMetrics};
