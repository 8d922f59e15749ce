// Batch ejection: device grouping, concurrent execution, aggregation

pub mod coordinator;
pub mod report;

#[cfg(test)]
mod coordinator_tests;

pub use coordinator::BatchEjectCoordinator;
pub use report::{BatchResult, OperationResult, SingleEjectResult};
