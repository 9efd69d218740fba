use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::{Normal, Signer};
use polymarket_client_sdk::clob::client::{Client, Config};
use polymarket_client_sdk::POLYGON;

use crate::cache::TtlCache;
use crate::external::VenueError;

const CLOB_API_BASE: &str = "https://clob.polymarket.com";

pub type AuthenticatedClient = Client<Authenticated<Normal>>;

/// Wraps the authenticated Polymarket SDK client and signer.
///
/// The private key is used once during construction and never stored as a string.
pub struct PolymarketWallet {
    signer: PrivateKeySigner,
    client: AuthenticatedClient,
}

impl PolymarketWallet {
    /// Authenticate against the CLOB API with a hex-encoded private key,
    /// deriving or creating an API key as needed.
    pub async fn new(private_key: &str) -> anyhow::Result<Self> {
        let signer = parse_signer(private_key)?;

        let unauthenticated = Client::new(CLOB_API_BASE, Config::default())?;
        let client = unauthenticated
            .authentication_builder(&signer)
            .authenticate()
            .await?;

        Ok(Self { signer, client })
    }

    pub fn wallet_address(&self) -> String {
        format!("{}", self.client.address())
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

/// Parse a hex private key (with or without `0x`) into a Polygon signer.
pub fn parse_signer(private_key: &str) -> anyhow::Result<PrivateKeySigner> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    Ok(PrivateKeySigner::from_str(key)?.with_chain_id(Some(POLYGON)))
}

pub type SessionCache = TtlCache<String, Arc<PolymarketWallet>>;

/// Signing credentials per owner, authenticated lazily.
///
/// Sessions live in `sessions` for its TTL and are re-authenticated
/// afterwards, or straight away once the venue rejects their credentials.
pub struct WalletRegistry {
    keys: HashMap<String, String>,
    sessions: SessionCache,
}

impl WalletRegistry {
    pub fn new(keys: HashMap<String, String>, sessions: SessionCache) -> Self {
        Self { keys, sessions }
    }

    pub fn single(owner: &str, private_key: &str, sessions: SessionCache) -> Self {
        Self::new(
            HashMap::from([(owner.to_string(), private_key.to_string())]),
            sessions,
        )
    }

    /// Raw signing key for `owner`, for on-chain calls outside the CLOB.
    pub fn signer_for(&self, owner: &str) -> Result<PrivateKeySigner, VenueError> {
        let key = self
            .keys
            .get(owner)
            .ok_or_else(|| VenueError::NoCredentials(owner.to_string()))?;
        parse_signer(key).map_err(|e| VenueError::Unexpected(format!("invalid private key: {e}")))
    }

    /// Authenticated wallet for `owner`.
    pub async fn wallet_for(&self, owner: &str) -> Result<Arc<PolymarketWallet>, VenueError> {
        let key = self
            .keys
            .get(owner)
            .ok_or_else(|| VenueError::NoCredentials(owner.to_string()))?;

        self.sessions
            .get_or_try_insert_with(owner.to_string(), || async {
                let wallet = PolymarketWallet::new(key)
                    .await
                    .map_err(|e| VenueError::Transport(format!("authentication failed: {e}")))?;
                tracing::info!(
                    owner,
                    address = %wallet.wallet_address(),
                    "Wallet authenticated"
                );
                Ok(Arc::new(wallet))
            })
            .await
    }

    /// Drop a cached session, e.g. after the venue rejected its credentials.
    pub async fn invalidate(&self, owner: &str) {
        self.sessions.invalidate(&owner.to_string()).await;
    }

    /// Pass `result` through, dropping the owner's session first when the
    /// venue refused its credentials.
    pub async fn check_auth<T>(
        &self,
        owner: &str,
        result: Result<T, VenueError>,
    ) -> Result<T, VenueError> {
        if let Err(e) = &result {
            if is_auth_failure(&e.to_string()) {
                tracing::warn!(owner, error = %e, "Venue refused credentials, dropping session");
                self.invalidate(owner).await;
            }
        }
        result
    }
}

/// Venue error text that means the API key or signature was not accepted.
pub fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["unauthorized", "status 401", "http 401", "invalid api key", "invalid signature"]
        .iter()
        .any(|needle| lower.contains(needle))
}
