pub mod reconcile;
pub mod signal;

pub use reconcile::{
    log_grew, split_timestamp, strip_timestamp, CollapseMode, EphemeralTable, LogReconciler,
    DEFAULT_EPHEMERAL_PREFIXES,
};
pub use signal::{parse_signal, render_line, DisplayLine, Signal};
