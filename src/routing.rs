//! Application router configuration.

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::{
    AppState,
    category::{
        create_category_endpoint, delete_category_endpoint, get_categories_endpoint,
        update_category_endpoint,
    },
    endpoints,
    events::get_events_endpoint,
    logging::logging_middleware,
    recurring::{
        create_rule_endpoint, delete_rule_endpoint, get_rule_endpoint, get_rules_endpoint,
        process_due_endpoint, run_rule_endpoint, update_rule_endpoint,
    },
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, get_transaction_endpoint,
        get_transactions_endpoint, update_transaction_endpoint,
    },
    user::{create_user_endpoint, update_plan_endpoint},
};

/// Return a router with all the app's routes.
///
/// Every route except user registration expects the `x-user-id` header set by
/// the upstream authentication layer.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::USERS, post(create_user_endpoint))
        .route(endpoints::USER_PLAN, put(update_plan_endpoint))
        .route(
            endpoints::CATEGORIES,
            post(create_category_endpoint).get(get_categories_endpoint),
        )
        .route(
            endpoints::CATEGORY,
            put(update_category_endpoint).delete(delete_category_endpoint),
        )
        .route(
            endpoints::TRANSACTIONS,
            post(create_transaction_endpoint).get(get_transactions_endpoint),
        )
        .route(
            endpoints::TRANSACTION,
            get(get_transaction_endpoint)
                .put(update_transaction_endpoint)
                .delete(delete_transaction_endpoint),
        )
        .route(
            endpoints::RECURRING_RULES,
            post(create_rule_endpoint).get(get_rules_endpoint),
        )
        .route(endpoints::PROCESS_DUE_RULES, post(process_due_endpoint))
        .route(
            endpoints::RECURRING_RULE,
            get(get_rule_endpoint)
                .put(update_rule_endpoint)
                .delete(delete_rule_endpoint),
        )
        .route(endpoints::RUN_RECURRING_RULE, post(run_rule_endpoint))
        .route(endpoints::EVENTS, get(get_events_endpoint))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}
