//! Terminal output for the `hangar` CLI
//!
//! Uses `cliclack` log lines on an interactive terminal and falls back
//! to plain, prefix-tagged lines when output is piped or running in CI.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_success, outro_warn, remark, section, step_info,
    step_ok, step_ok_detail, step_warn, step_warn_hint,
};
