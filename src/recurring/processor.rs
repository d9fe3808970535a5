//! Materializes due recurring rules into transactions.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    Error, RecurrenceConfig,
    events::{EventRegistry, TRANSACTION_CREATED},
    notification::Notifier,
    recurring::{
        RecurringRule, RuleId,
        db::{
            RuleSchedule, deactivate_rule, get_due_rules, get_recurring_rule, get_rule_by_id,
            update_rule_schedule,
        },
        guard::{Fingerprint, find_existing},
        schedule::advance,
    },
    transaction::{Transaction, create_transaction},
    user::UserId,
};

/// The result of a sweep over the due rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    /// Rules that were run, including runs where the transaction already existed.
    pub processed: usize,
    /// Rules that could not be run. These are left unchanged and retried on the next sweep.
    pub failed: usize,
}

/// The result of running a rule on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunNowOutcome {
    /// The transaction for today's occurrence.
    pub transaction: Transaction,
    /// Whether the transaction was created by this run, false if it already existed.
    pub created: bool,
    /// The rule after the run.
    pub rule: RecurringRule,
}

/// What happened to one rule during a sweep.
#[derive(Debug)]
enum RuleRun {
    /// A new transaction was created.
    Created(Transaction, RecurringRule),
    /// The occurrence already had a transaction, only the schedule was advanced.
    AlreadyMaterialized(RecurringRule),
    /// The rule ended before its next run and was deactivated without running.
    Stale,
    /// Another sweep ran the rule first.
    NotDue,
}

/// Turns due recurring rules into transactions.
///
/// Each rule is run inside its own SQL transaction: the transaction for the
/// occurrence and the rule's new schedule are committed together. The
/// notification and the `transaction_created` event are sent after the commit
/// and their failure does not undo the run.
pub struct RecurrenceProcessor {
    db_connection: Arc<Mutex<Connection>>,
    events: EventRegistry,
    notifier: Arc<dyn Notifier>,
    config: RecurrenceConfig,
}

impl std::fmt::Debug for RecurrenceProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurrenceProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RecurrenceProcessor {
    /// Create a processor that stores transactions in `db_connection`.
    pub fn new(
        db_connection: Arc<Mutex<Connection>>,
        events: EventRegistry,
        notifier: Arc<dyn Notifier>,
        config: RecurrenceConfig,
    ) -> Self {
        Self {
            db_connection,
            events,
            notifier,
            config,
        }
    }

    /// The config the processor was created with.
    pub fn config(&self) -> &RecurrenceConfig {
        &self.config
    }

    /// Run every active rule whose next run is at or before `now`, once.
    ///
    /// Each due rule creates at most one transaction per call, dated at the
    /// rule's next run. A rule that is several occurrences behind catches up
    /// one occurrence per sweep.
    ///
    /// # Errors
    /// Returns an error only if the due rules cannot be listed. Failures of
    /// individual rules are logged and counted in [ProcessingSummary::failed].
    pub async fn process_due(&self, now: OffsetDateTime) -> Result<ProcessingSummary, Error> {
        let due_rules = self.due_rules(now)?;
        let mut summary = ProcessingSummary::default();

        for rule in due_rules {
            match self.run_due_rule(rule.id, now) {
                Ok(RuleRun::Created(transaction, rule)) => {
                    summary.processed += 1;
                    self.after_run(&rule, &transaction).await;
                }
                Ok(RuleRun::AlreadyMaterialized(rule)) => {
                    summary.processed += 1;
                    tracing::debug!(
                        "Recurring rule {} already has a transaction for this occurrence, next run at {}",
                        rule.id,
                        rule.next_run
                    );
                }
                Ok(RuleRun::Stale | RuleRun::NotDue) => {}
                Err(error) => {
                    summary.failed += 1;
                    tracing::error!("Could not run recurring rule {}: {error}", rule.id);
                }
            }
        }

        if summary != ProcessingSummary::default() {
            tracing::info!(
                "Processed {} due recurring rules, {} failed",
                summary.processed,
                summary.failed
            );
        }

        Ok(summary)
    }

    /// Run a rule immediately, creating a transaction dated `now`.
    ///
    /// If a matching transaction already exists today, for example because a
    /// sweep materialized today's occurrence, that transaction is returned
    /// instead of creating another. Either way the rule's next run advances by
    /// one step, since the run counts as its next occurrence.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if the rule does not exist or belongs to another user,
    /// - or [Error::RuleInactive] if the rule has been deactivated,
    /// - or [Error::Scheduling] if the next run cannot be computed.
    pub async fn run_now(
        &self,
        user_id: UserId,
        rule_id: RuleId,
        now: OffsetDateTime,
    ) -> Result<RunNowOutcome, Error> {
        let outcome = self.run_rule_now(user_id, rule_id, now)?;

        if outcome.created {
            self.after_run(&outcome.rule, &outcome.transaction).await;
        }

        Ok(outcome)
    }

    /// Sweep for due rules every [RecurrenceConfig::sweep_interval], forever.
    pub async fn run_periodic_sweep(self: Arc<Self>) {
        tracing::info!(
            "Starting recurring rule sweep (interval: {:?})",
            self.config.sweep_interval
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval);

        loop {
            interval.tick().await;

            if let Err(error) = self.process_due(OffsetDateTime::now_utc()).await {
                tracing::error!("Recurring rule sweep failed: {error}");
            }
        }
    }

    fn due_rules(&self, now: OffsetDateTime) -> Result<Vec<RecurringRule>, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        get_due_rules(now, &connection)
    }

    fn run_due_rule(&self, rule_id: RuleId, now: OffsetDateTime) -> Result<RuleRun, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        let sql_transaction = connection.unchecked_transaction()?;

        // Re-read under the lock in case an overlapping sweep got here first.
        let rule = get_rule_by_id(rule_id, &sql_transaction)?;
        if !rule.is_active || rule.next_run > now {
            return Ok(RuleRun::NotDue);
        }

        if rule.ends_before(rule.next_run) {
            tracing::warn!(
                "Recurring rule {} ended at {:?} before its next run at {}, deactivating it",
                rule.id,
                rule.end_date,
                rule.next_run
            );
            deactivate_rule(rule.id, &sql_transaction)?;
            sql_transaction.commit()?;
            return Ok(RuleRun::Stale);
        }

        let occurrence = rule.next_run;
        let next_run = advance(occurrence, rule.frequency_value, rule.frequency_unit)?;
        let is_active = !rule.ends_before(next_run);

        let existing = find_existing(
            Fingerprint::of(&rule),
            occurrence,
            self.config.utc_offset,
            &sql_transaction,
        )?;

        let run = match existing {
            Some(_) => {
                let rule = update_rule_schedule(
                    rule.id,
                    RuleSchedule {
                        next_run,
                        last_run_at: rule.last_run_at,
                        is_active,
                    },
                    &sql_transaction,
                )?;
                RuleRun::AlreadyMaterialized(rule)
            }
            None => {
                let transaction =
                    create_transaction(rule.user_id, rule.transaction_at(occurrence), &sql_transaction)?;
                let rule = update_rule_schedule(
                    rule.id,
                    RuleSchedule {
                        next_run,
                        last_run_at: Some(now),
                        is_active,
                    },
                    &sql_transaction,
                )?;
                RuleRun::Created(transaction, rule)
            }
        };

        sql_transaction.commit()?;

        if !is_active {
            tracing::info!("Recurring rule {rule_id} has reached its end date and is now inactive");
        }

        Ok(run)
    }

    fn run_rule_now(
        &self,
        user_id: UserId,
        rule_id: RuleId,
        now: OffsetDateTime,
    ) -> Result<RunNowOutcome, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        let sql_transaction = connection.unchecked_transaction()?;

        let rule = get_recurring_rule(user_id, rule_id, &sql_transaction)?;
        if !rule.is_active {
            return Err(Error::RuleInactive);
        }

        let next_run = advance(rule.next_run, rule.frequency_value, rule.frequency_unit)?;
        let is_active = !rule.ends_before(next_run);

        let existing = find_existing(
            Fingerprint::of(&rule),
            now,
            self.config.utc_offset,
            &sql_transaction,
        )?;

        let (transaction, created, last_run_at) = match existing {
            Some(transaction) => (transaction, false, rule.last_run_at),
            None => {
                let transaction =
                    create_transaction(user_id, rule.transaction_at(now), &sql_transaction)?;
                (transaction, true, Some(now))
            }
        };

        let rule = update_rule_schedule(
            rule.id,
            RuleSchedule {
                next_run,
                last_run_at,
                is_active,
            },
            &sql_transaction,
        )?;

        sql_transaction.commit()?;

        Ok(RunNowOutcome {
            transaction,
            created,
            rule,
        })
    }

    /// Notify the user and publish the new transaction. Failures are only logged.
    async fn after_run(&self, rule: &RecurringRule, transaction: &Transaction) {
        if rule.notify_on_run
            && let Err(error) = self
                .notifier
                .notify_rule_run(rule.user_id, rule, transaction)
                .await
        {
            tracing::warn!("Could not notify user {} about rule {}: {error}", rule.user_id, rule.id);
        }

        match serde_json::to_value(transaction) {
            Ok(payload) => {
                let delivered =
                    self.events
                        .publish_to_user(rule.user_id, TRANSACTION_CREATED, payload);
                tracing::debug!(
                    "Published transaction {} to {delivered} connections",
                    transaction.id
                );
            }
            Err(error) => tracing::error!("Could not encode transaction {}: {error}", transaction.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rusqlite::Connection;
    use time::{OffsetDateTime, macros::datetime};

    use crate::{
        Error, RecurrenceConfig,
        category::{CategoryName, NewCategory, create_category},
        db::initialize,
        events::{EventRegistry, TRANSACTION_CREATED},
        notification::{LogNotifier, NotificationError, Notifier},
        recurring::{
            FrequencyUnit, RecurringRule, RuleDraft, create_recurring_rule, get_recurring_rule,
        },
        transaction::{
            Transaction, TransactionQuery, TransactionType, count_transactions,
            create_transaction, query_transactions,
        },
        user::{Plan, UserId, create_user},
    };

    use super::{ProcessingSummary, RecurrenceProcessor};

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(UserId, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_rule_run(
            &self,
            user_id: UserId,
            rule: &RecurringRule,
            _transaction: &Transaction,
        ) -> Result<(), NotificationError> {
            self.calls.lock().unwrap().push((user_id, rule.title.clone()));

            if self.fail {
                Err(NotificationError::Delivery("mailbox full".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        connection: Arc<Mutex<Connection>>,
        events: EventRegistry,
        processor: RecurrenceProcessor,
    }

    fn fixture_with_notifier(notifier: Arc<dyn Notifier>) -> Fixture {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        create_user("test@example.com", Plan::Premium, &connection).unwrap();
        let connection = Arc::new(Mutex::new(connection));
        let events = EventRegistry::new();
        let processor = RecurrenceProcessor::new(
            connection.clone(),
            events.clone(),
            notifier,
            RecurrenceConfig::default(),
        );

        Fixture {
            connection,
            events,
            processor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_notifier(Arc::new(LogNotifier))
    }

    fn daily_rent() -> RuleDraft {
        RuleDraft::new(
            "Rent",
            TransactionType::Expense,
            450.0,
            1,
            FrequencyUnit::Days,
            datetime!(2024-01-01 09:00 UTC),
        )
    }

    /// Create a rule as if it had been created at `created_at`.
    fn insert_rule(fixture: &Fixture, draft: RuleDraft, created_at: OffsetDateTime) -> RecurringRule {
        let connection = fixture.connection.lock().unwrap();
        create_recurring_rule(1, draft, created_at, &RecurrenceConfig::default(), &connection)
            .unwrap()
    }

    fn reload(fixture: &Fixture, rule: &RecurringRule) -> RecurringRule {
        let connection = fixture.connection.lock().unwrap();
        get_recurring_rule(1, rule.id, &connection).unwrap()
    }

    fn all_transactions(fixture: &Fixture) -> Vec<Transaction> {
        let connection = fixture.connection.lock().unwrap();
        query_transactions(1, &TransactionQuery::default(), &connection).unwrap()
    }

    #[tokio::test]
    async fn due_rule_creates_one_transaction_per_sweep() {
        let fixture = fixture();
        let rule = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));
        let now = datetime!(2024-01-03 00:00 UTC);

        let summary = fixture.processor.process_due(now).await.unwrap();

        assert_eq!(summary, ProcessingSummary { processed: 1, failed: 0 });
        let transactions = all_transactions(&fixture);
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].date, datetime!(2024-01-01 09:00 UTC));
        assert_eq!(transactions[0].title, "Rent");
        let rule = reload(&fixture, &rule);
        assert_eq!(rule.next_run, datetime!(2024-01-02 09:00 UTC));
        assert_eq!(rule.last_run_at, Some(now));
        assert!(rule.is_active);
    }

    #[tokio::test]
    async fn repeated_sweeps_do_not_duplicate() {
        let fixture = fixture();
        let rule = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));
        let now = datetime!(2024-01-01 12:00 UTC);

        fixture.processor.process_due(now).await.unwrap();
        let second = fixture.processor.process_due(now).await.unwrap();

        assert_eq!(second, ProcessingSummary::default());
        assert_eq!(all_transactions(&fixture).len(), 1);
        assert_eq!(reload(&fixture, &rule).next_run, datetime!(2024-01-02 09:00 UTC));
    }

    #[tokio::test]
    async fn existing_transaction_is_not_duplicated_but_rule_advances() {
        let fixture = fixture();
        let rule = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));
        {
            let connection = fixture.connection.lock().unwrap();
            create_transaction(
                1,
                Transaction::build(
                    "Rent",
                    TransactionType::Expense,
                    450.0,
                    datetime!(2024-01-01 18:00 UTC),
                ),
                &connection,
            )
            .unwrap();
        }

        let summary = fixture
            .processor
            .process_due(datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(all_transactions(&fixture).len(), 1);
        let rule = reload(&fixture, &rule);
        assert_eq!(rule.next_run, datetime!(2024-01-02 09:00 UTC));
        assert_eq!(rule.last_run_at, None);
    }

    #[tokio::test]
    async fn rule_is_deactivated_after_its_last_occurrence() {
        let fixture = fixture();
        let mut draft = daily_rent().end_date(Some(datetime!(2024-01-05 00:00 UTC)));
        draft.start_date = datetime!(2024-01-05 09:00 UTC);
        let rule = insert_rule(&fixture, draft, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(rule.end_date, Some(datetime!(2024-01-05 23:59:59.999 UTC)));

        let summary = fixture
            .processor
            .process_due(datetime!(2024-01-06 08:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        let rule = reload(&fixture, &rule);
        assert!(!rule.is_active);
        assert_eq!(rule.next_run, datetime!(2024-01-06 09:00 UTC));

        let later = fixture
            .processor
            .process_due(datetime!(2024-01-10 00:00 UTC))
            .await
            .unwrap();

        assert_eq!(later, ProcessingSummary::default());
        assert_eq!(all_transactions(&fixture).len(), 1);
    }

    #[tokio::test]
    async fn stale_rule_is_deactivated_without_running() {
        let fixture = fixture();
        let rule = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));
        {
            // Simulate a rule whose end date was moved before its next run
            // without going through the edit path.
            let connection = fixture.connection.lock().unwrap();
            connection
                .execute(
                    "UPDATE recurring_rule SET end_date = ?1 WHERE id = ?2",
                    (
                        crate::timestamp::to_millis(datetime!(2023-12-31 23:59:59.999 UTC)),
                        rule.id,
                    ),
                )
                .unwrap();
        }

        let summary = fixture
            .processor
            .process_due(datetime!(2024-01-02 00:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary, ProcessingSummary::default());
        assert!(!reload(&fixture, &rule).is_active);
        assert!(all_transactions(&fixture).is_empty());
    }

    #[tokio::test]
    async fn failing_rule_does_not_abort_the_sweep() {
        let fixture = fixture();
        let broken = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));
        let mut draft = daily_rent();
        draft.title = "Salary".to_owned();
        draft.transaction_type = TransactionType::Income;
        let healthy = insert_rule(&fixture, draft, datetime!(2023-12-25 12:00 UTC));
        {
            let connection = fixture.connection.lock().unwrap();
            // A year so large that the next run is out of range.
            connection
                .execute(
                    "UPDATE recurring_rule SET frequency_value = 4000000000, frequency_unit = 'YEARS'
                     WHERE id = ?1",
                    [broken.id],
                )
                .unwrap();
        }

        let summary = fixture
            .processor
            .process_due(datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary, ProcessingSummary { processed: 1, failed: 1 });
        let transactions = all_transactions(&fixture);
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].title, "Salary");
        // The failed rule is left unchanged for the next sweep.
        assert_eq!(reload(&fixture, &broken).next_run, broken.next_run);
        assert_eq!(reload(&fixture, &healthy).next_run, datetime!(2024-01-02 09:00 UTC));
    }

    #[tokio::test]
    async fn notifies_when_requested() {
        let notifier = Arc::new(RecordingNotifier::default());
        let fixture = fixture_with_notifier(notifier.clone());
        insert_rule(
            &fixture,
            daily_rent().notify_on_run(true),
            datetime!(2023-12-25 12:00 UTC),
        );
        let mut quiet = daily_rent();
        quiet.title = "Gym".to_owned();
        insert_rule(&fixture, quiet, datetime!(2023-12-25 12:00 UTC));

        fixture
            .processor
            .process_due(datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap();

        assert_eq!(*notifier.calls.lock().unwrap(), vec![(1, "Rent".to_owned())]);
    }

    #[tokio::test]
    async fn failed_notification_keeps_the_transaction() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let fixture = fixture_with_notifier(notifier.clone());
        let rule = insert_rule(
            &fixture,
            daily_rent().notify_on_run(true),
            datetime!(2023-12-25 12:00 UTC),
        );

        let summary = fixture
            .processor
            .process_due(datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary, ProcessingSummary { processed: 1, failed: 0 });
        assert_eq!(all_transactions(&fixture).len(), 1);
        assert_eq!(reload(&fixture, &rule).next_run, datetime!(2024-01-02 09:00 UTC));
        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publishes_created_transactions() {
        let fixture = fixture();
        let (_, mut receiver) = fixture.events.subscribe(1);
        insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));

        fixture
            .processor
            .process_due(datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap();

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name, TRANSACTION_CREATED);
        assert_eq!(event.payload["title"], "Rent");
        assert_eq!(event.payload["date"], "2024-01-01T09:00:00Z");
    }

    #[tokio::test]
    async fn run_now_returns_todays_existing_transaction() {
        let fixture = fixture();
        let mut draft = daily_rent();
        draft.start_date = datetime!(2024-01-05 09:00 UTC);
        let rule = insert_rule(&fixture, draft, datetime!(2024-01-01 00:00 UTC));
        fixture
            .processor
            .process_due(datetime!(2024-01-05 09:30 UTC))
            .await
            .unwrap();
        let swept = all_transactions(&fixture);
        assert_eq!(swept.len(), 1);

        let outcome = fixture
            .processor
            .run_now(1, rule.id, datetime!(2024-01-05 12:00 UTC))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.transaction, swept[0]);
        assert_eq!(all_transactions(&fixture).len(), 1);
        assert_eq!(outcome.rule.next_run, datetime!(2024-01-07 09:00 UTC));
    }

    #[tokio::test]
    async fn run_now_creates_transaction_dated_now() {
        let fixture = fixture();
        let category = {
            let connection = fixture.connection.lock().unwrap();
            create_category(
                1,
                NewCategory::named(CategoryName::new_unchecked("Housing")),
                &connection,
            )
            .unwrap()
        };
        let rule = insert_rule(
            &fixture,
            daily_rent().category_id(Some(category.id)),
            datetime!(2023-12-25 12:00 UTC),
        );
        let now = datetime!(2023-12-28 15:00 UTC);

        let outcome = fixture.processor.run_now(1, rule.id, now).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.transaction.date, now);
        assert_eq!(outcome.transaction.category_id, Some(category.id));
        assert_eq!(outcome.rule.next_run, datetime!(2024-01-02 09:00 UTC));
        assert_eq!(outcome.rule.last_run_at, Some(now));
    }

    #[tokio::test]
    async fn run_now_rejects_inactive_rule() {
        let fixture = fixture();
        let rule = insert_rule(
            &fixture,
            daily_rent().is_active(false),
            datetime!(2023-12-25 12:00 UTC),
        );

        let result = fixture
            .processor
            .run_now(1, rule.id, datetime!(2024-01-01 12:00 UTC))
            .await;

        assert_eq!(result, Err(Error::RuleInactive));
        let connection = fixture.connection.lock().unwrap();
        assert_eq!(count_transactions(&connection), Ok(0));
    }

    #[tokio::test]
    async fn run_now_rejects_other_users_rule() {
        let fixture = fixture();
        {
            let connection = fixture.connection.lock().unwrap();
            create_user("other@example.com", Plan::Free, &connection).unwrap();
        }
        let rule = insert_rule(&fixture, daily_rent(), datetime!(2023-12-25 12:00 UTC));

        let result = fixture
            .processor
            .run_now(2, rule.id, datetime!(2024-01-01 12:00 UTC))
            .await;

        assert_eq!(result, Err(Error::NotFound));
    }
}
