/// Configuration serialization and deserialization.
pub mod config;

/// SSH related functionality.
pub mod ssh;

/// Remote sessions and command handles.
pub mod remote;

/// Deploy cycle scripts.
pub mod deploy;

/// Server provisioning.
pub mod provision;

/// docker-compose and environment file generation.
pub mod compose;

/// Utility functions for common operations.
pub mod utils;

/// CLI interface and commands.
pub mod cli;
