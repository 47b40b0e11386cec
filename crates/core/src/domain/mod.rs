pub mod connection;
pub mod credential;
pub mod sync;
pub mod wizard;
