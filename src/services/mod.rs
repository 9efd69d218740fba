pub mod activity_monitor;
pub mod redemption_scanner;
pub mod settlement_monitor;

pub use activity_monitor::{ActivityMonitor, CycleReport, MonitorSettings};
pub use redemption_scanner::{RedemptionScanner, RedemptionSettings, ScanReport};
pub use settlement_monitor::{SettlementMonitor, WatchOutcome};
