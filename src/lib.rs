pub mod anonymize;
pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod report;
pub mod tui;
