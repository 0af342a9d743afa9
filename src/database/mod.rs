pub mod buffer;
pub mod connection;
pub mod operations;

pub use buffer::BatchWriter;
pub use connection::ConnectSettings;
pub use operations::{Backend, PostgresBackend};
