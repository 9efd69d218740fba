pub mod balance;
pub mod data_client;
pub mod dry_run;
pub mod gamma_client;
pub mod redeem;
pub mod signal_client;
pub mod trading;
pub mod types;
pub mod wallet;

pub use balance::PolymarketBalances;
pub use data_client::DataClient;
pub use dry_run::{DryRunBalances, DryRunRedeemer, DryRunVenue};
pub use gamma_client::GammaClient;
pub use redeem::CtfRedeemer;
pub use signal_client::SignalClient;
pub use trading::PolymarketVenue;
pub use types::{ApiSignal, ApiTrade};
pub use wallet::{PolymarketWallet, WalletRegistry};
