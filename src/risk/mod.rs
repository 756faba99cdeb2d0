// Exit conditions for an open session
pub mod exit_rules;

pub use exit_rules::{ExitReason, ExitRules};
