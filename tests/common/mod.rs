/// Common test utilities for the integration tests
///
/// This module provides shared functionality including:
/// - A scripted arbiter that stands in for the native backend
/// - Volume fixtures in the shapes the batch code cares about
pub mod fake_arbiter;
pub mod fixtures;
