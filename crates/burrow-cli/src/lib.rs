//! burrow: command-line entry points for the backup agent

pub mod commands;
