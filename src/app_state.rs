//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{
    Error, RecurrenceConfig, db::initialize, events::EventRegistry, notification::Notifier,
    recurring::RecurrenceProcessor,
};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// The open event streams of connected clients.
    pub events: EventRegistry,

    /// Runs recurring rules, both on a timer and on demand.
    pub processor: Arc<RecurrenceProcessor>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    /// Users are notified about rule runs through `notifier`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        config: RecurrenceConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let connection = Arc::new(Mutex::new(db_connection));
        let events = EventRegistry::new();
        let processor = Arc::new(RecurrenceProcessor::new(
            connection.clone(),
            events.clone(),
            notifier,
            config,
        ));

        Ok(Self {
            db_connection: connection,
            events,
            processor,
        })
    }
}
