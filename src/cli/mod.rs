//! This module contains the config implementation. If gecko is used as a lib, a config file or a config struct can be used instead of the CLI args.

pub mod args;
pub mod config;
