mod database_driver;
mod failover_notifier;

pub use database_driver::{ConnectError, DatabaseConnection, DatabaseDriver, DbConnection};
pub use failover_notifier::{FailoverNotifier, NotificationError};
