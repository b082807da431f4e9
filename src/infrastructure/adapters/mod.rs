pub mod evm_rpc;
pub mod mock;
pub mod snapshot;
pub mod step_executor;

pub use evm_rpc::EvmRpcAdapter;
pub use snapshot::AdapterSnapshotSource;
pub use step_executor::AdapterStepExecutor;
