//! Test utilities for arena-based testing.
//!
//! Each test compiles its unit against a bounded arena, the same way an
//! embedding compiler gives every compiled unit its own session.
