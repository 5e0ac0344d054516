//! File-backed wallet keystore.
//!
//! Maps account ids to keypairs with a single-wallet-per-account
//! invariant. Key custody/encryption is out of scope for this layer; the
//! keystore is a plain JSON file written atomically (tmp + rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::info;

use super::WalletError;

/// In-memory keystore with JSON file persistence.
pub struct WalletStore {
    path: PathBuf,
    keys: DashMap<String, Arc<Keypair>>,
}

impl WalletStore {
    /// Open the keystore at `path`, loading existing keys if the file exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let keys = DashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| WalletError::Keystore(format!("read {path:?}: {e}")))?;
            let raw: HashMap<String, String> = serde_json::from_str(&content)
                .map_err(|e| WalletError::Keystore(format!("parse {path:?}: {e}")))?;
            for (account_id, encoded) in raw {
                let keypair = decode_keypair(&encoded)?;
                keys.insert(account_id, Arc::new(keypair));
            }
            info!(count = keys.len(), "loaded wallet keystore");
        }

        Ok(Self { path, keys })
    }

    /// Whether a wallet exists for this account.
    pub fn contains(&self, account_id: &str) -> bool {
        self.keys.contains_key(account_id)
    }

    /// Keypair for this account, if registered.
    pub fn keypair(&self, account_id: &str) -> Option<Arc<Keypair>> {
        self.keys.get(account_id).map(|k| Arc::clone(&k))
    }

    /// Pubkey for this account, if registered.
    pub fn pubkey(&self, account_id: &str) -> Option<Pubkey> {
        self.keys.get(account_id).map(|k| k.pubkey())
    }

    /// All account ids with a registered wallet.
    pub fn accounts(&self) -> Vec<String> {
        self.keys.iter().map(|e| e.key().clone()).collect()
    }

    /// Insert a keypair without persisting. Rejects duplicates.
    pub fn insert(&self, account_id: &str, keypair: Keypair) -> Result<Pubkey, WalletError> {
        if self.keys.contains_key(account_id) {
            return Err(WalletError::AlreadyExists(account_id.to_string()));
        }
        let pubkey = keypair.pubkey();
        self.keys.insert(account_id.to_string(), Arc::new(keypair));
        Ok(pubkey)
    }

    /// Remove a key. Used for rollback when a multi-step registration
    /// partially fails.
    pub fn remove(&self, account_id: &str) {
        self.keys.remove(account_id);
    }

    /// Export the base58-encoded keypair for this account.
    pub fn export(&self, account_id: &str) -> Result<String, WalletError> {
        self.keys
            .get(account_id)
            .map(|k| bs58::encode(k.to_bytes()).into_string())
            .ok_or_else(|| WalletError::NotFound(account_id.to_string()))
    }

    /// Persist the keystore atomically.
    pub fn persist(&self) -> Result<(), WalletError> {
        let raw: HashMap<String, String> = self
            .keys
            .iter()
            .map(|e| (e.key().clone(), bs58::encode(e.value().to_bytes()).into_string()))
            .collect();
        let content = serde_json::to_string_pretty(&raw)
            .map_err(|e| WalletError::Keystore(format!("serialize keystore: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WalletError::Keystore(format!("create {parent:?}: {e}")))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| WalletError::Keystore(format!("write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| WalletError::Keystore(format!("rename {tmp:?}: {e}")))?;
        Ok(())
    }
}

/// Decode a base58-encoded 64-byte keypair.
pub fn decode_keypair(encoded: &str) -> Result<Keypair, WalletError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| WalletError::InvalidKey(format!("base58: {e}")))?;
    Keypair::from_bytes(&bytes).map_err(|e| WalletError::InvalidKey(format!("keypair: {e}")))
}
