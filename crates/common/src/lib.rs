//! Common utilities and types shared across the proctoring media components.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for logging configuration and tracing initialization
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
