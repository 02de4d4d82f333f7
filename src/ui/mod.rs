//! Terminal output
//!
//! Styled output with `console` and spinners with `indicatif` in an
//! interactive terminal; plain `[OK]`/`[WARN]` lines otherwise, so CI logs
//! stay readable.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    format_bytes, key_value, key_value_status, remark, section, step_error_detail, step_info,
    step_ok, step_ok_detail, step_warn, step_warn_hint, UsageLevel,
};
pub use progress::TaskSpinner;
