// ABOUTME: Shared configuration surface for Devbox crates
// ABOUTME: Re-exports the environment variable name constants

pub mod constants;
