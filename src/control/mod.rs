// ABOUTME: Control store module - definitions, bindings, watermarks and run logs
// ABOUTME: Everything the sync engine reads before a run and writes after one

pub mod models;
pub mod store;

pub use models::{
    EnvironmentRecord, RunLogEntry, SourceObjectDefinition, SyncBinding, Watermark,
    DEFAULT_PAGE_SIZE,
};
pub use store::ControlStore;
