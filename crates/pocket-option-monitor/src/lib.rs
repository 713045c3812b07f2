/*
[INPUT]:  Public API exports for pocket-option-monitor crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod runner;

pub use config::MonitorConfig;
pub use runner::Monitor;
