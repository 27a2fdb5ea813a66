pub mod concatenation;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod sqlite;
