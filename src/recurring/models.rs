use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    DatabaseId, Error,
    category::CategoryId,
    recurring::schedule::FrequencyUnit,
    transaction::{Transaction, TransactionBuilder, TransactionType},
    user::UserId,
};

/// Database identifier for a recurring rule.
pub type RuleId = DatabaseId;

/// A schedule that creates a transaction every `frequency_value` `frequency_unit`s.
///
/// Once `is_active` is false the rule is never run again, except by
/// explicitly re-activating it through an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    /// The ID of the rule.
    pub id: RuleId,
    /// The user that owns the rule.
    #[serde(skip_serializing, default)]
    pub user_id: UserId,
    /// The title given to each created transaction.
    pub title: String,
    /// Whether each created transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The amount of each created transaction.
    pub amount: f64,
    /// The category of each created transaction.
    pub category_id: Option<CategoryId>,
    /// How many units between occurrences.
    pub frequency_value: u32,
    /// The unit of [RecurringRule::frequency_value].
    pub frequency_unit: FrequencyUnit,
    /// The first occurrence.
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    /// The last moment an occurrence may fall on, always the end of a calendar day.
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    /// The next occurrence that has not been materialized.
    #[serde(with = "time::serde::rfc3339")]
    pub next_run: OffsetDateTime,
    /// When the rule last created a transaction.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    /// Whether the rule will create further transactions.
    pub is_active: bool,
    /// Whether the user wants to be notified each time the rule creates a transaction.
    pub notify_on_run: bool,
    /// The description given to each created transaction.
    pub description: String,
    /// When the rule was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl RecurringRule {
    /// The transaction for the occurrence at `date`.
    pub fn transaction_at(&self, date: OffsetDateTime) -> TransactionBuilder {
        Transaction::build(&self.title, self.transaction_type, self.amount, date)
            .description(&self.description)
            .category_id(self.category_id)
    }

    /// Whether `occurrence` is past the rule's end date.
    pub fn ends_before(&self, occurrence: OffsetDateTime) -> bool {
        self.end_date.is_some_and(|end_date| occurrence > end_date)
    }
}

/// The user-editable fields of a [RecurringRule].
///
/// The schedule fields (`next_run`, `last_run_at`) are derived from these when
/// the rule is stored.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct RuleDraft {
    pub title: String,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub category_id: Option<CategoryId>,
    pub frequency_value: u32,
    pub frequency_unit: FrequencyUnit,
    pub start_date: OffsetDateTime,
    /// Normalized to the end of its calendar day when the rule is stored.
    pub end_date: Option<OffsetDateTime>,
    pub is_active: bool,
    pub notify_on_run: bool,
    pub description: String,
}

impl RuleDraft {
    /// Start a draft for an active rule that repeats every `frequency_value` `frequency_unit`s
    /// from `start_date`.
    pub fn new(
        title: &str,
        transaction_type: TransactionType,
        amount: f64,
        frequency_value: u32,
        frequency_unit: FrequencyUnit,
        start_date: OffsetDateTime,
    ) -> Self {
        Self {
            title: title.to_owned(),
            transaction_type,
            amount,
            category_id: None,
            frequency_value,
            frequency_unit,
            start_date,
            end_date: None,
            is_active: true,
            notify_on_run: false,
            description: String::new(),
        }
    }

    /// Set the category of the created transactions.
    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Set the last day the rule may run on.
    pub fn end_date(mut self, end_date: Option<OffsetDateTime>) -> Self {
        self.end_date = end_date;
        self
    }

    /// Set whether the user is notified on each run.
    pub fn notify_on_run(mut self, notify_on_run: bool) -> Self {
        self.notify_on_run = notify_on_run;
        self
    }

    /// Set whether the rule is active.
    pub fn is_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Set the description of the created transactions.
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Check the fields that do not need the database.
    ///
    /// `end_date` is compared as given, callers normalize it first.
    ///
    /// # Errors
    /// Returns an [Error::Validation] describing the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title cannot be empty".to_owned()));
        }

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::Validation(format!(
                "amount must be greater than zero, got {}",
                self.amount
            )));
        }

        if self.frequency_value < 1 {
            return Err(Error::Validation(
                "frequency value must be at least 1".to_owned(),
            ));
        }

        if let Some(end_date) = self.end_date
            && end_date < self.start_date
        {
            return Err(Error::Validation(
                "end date cannot be before the start date".to_owned(),
            ));
        }

        Ok(())
    }
}
