//! Recurring rules and the processor that turns them into transactions.
//!
//! - [schedule]: pure date arithmetic for computing occurrences
//! - [guard]: detection of occurrences that already have a transaction
//! - [RecurrenceProcessor]: the sweep over due rules and on-demand runs

mod db;
mod endpoints;
pub mod guard;
mod models;
mod processor;
pub mod schedule;

pub use db::{
    RuleSchedule, count_active_rules, create_recurring_rule, create_recurring_rule_table,
    deactivate_rule, delete_recurring_rule, get_due_rules, get_recurring_rule,
    get_recurring_rules, update_recurring_rule, update_rule_schedule,
};
pub use endpoints::{
    RecurringRuleRequest, RecurringState, create_rule_endpoint, delete_rule_endpoint,
    get_rule_endpoint, get_rules_endpoint, process_due_endpoint, run_rule_endpoint,
    update_rule_endpoint,
};
pub use models::{RecurringRule, RuleDraft, RuleId};
pub use processor::{ProcessingSummary, RecurrenceProcessor, RunNowOutcome};
pub use schedule::{
    DEFAULT_MAX_CATCH_UP_ITERATIONS, FrequencyUnit, SchedulingError, advance, catch_up,
    catch_up_with_limit, end_of_day,
};
