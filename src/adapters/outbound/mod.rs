mod memory_driver;
mod tcp_driver;
mod webhook_notifier;

pub use memory_driver::{InMemoryConnection, InMemoryDriver, SimulatedEndpoint};
pub use tcp_driver::{TcpConnection, TcpDatabaseDriver};
pub use webhook_notifier::{FailoverNotification, WebhookNotifier};
