pub mod pool;
pub mod wrapper;

pub use pool::{ConnectionFactory, ConnectionPool};
pub use wrapper::{ConnectionEvent, ConnectionState, ConnectionWrapper};
