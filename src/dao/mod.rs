/// Typed repository over the document store.
pub mod game;
/// Document store contract and its backends.
pub mod game_store;
/// Persisted document models and their paths.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
