pub mod scanner;
pub mod transport;

pub use scanner::{DiscoveredFeeder, FeederScanner, ScanCallback, discover_feeders};
pub use transport::{BtleTransport, default_adapter};
