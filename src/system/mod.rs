pub mod collector;
pub mod counters;
pub mod platform;
pub mod process;
pub mod sampler;
pub mod snapshot;

pub use counters::{Counter, CounterHandle, NetworkInterface, RateCounter, RateSource};
pub use process::{IoDelta, IoTotals, ProcessDelta, ProcessSample, ProcessSource, ProcessTable};
pub use sampler::{Consumer, Published, Sampler};
pub use snapshot::{NetworkRates, SystemInfo, SystemSnapshot};
