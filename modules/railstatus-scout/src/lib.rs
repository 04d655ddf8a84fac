pub mod enrichment;
pub mod pipeline;
pub mod publisher;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
