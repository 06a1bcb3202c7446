//! Genesis state of the signing module and the one-shot contract seeding step.
//!
//! The module's state lives under `app_state.tss` of the genesis document. The seeding step reads
//! compiled contract artifacts, converts them to raw bytes and merges them into that section.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use schnorr_fun::frost::FrostKey;
use secp256kfun::marker::EvenY;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::Params;
use crate::error::{Result, TssError};
use crate::gateway::PendingBatches;
use crate::selector::{KeyInfo, KeyRegistry, ValidatorSnapshot};
use crate::types::{decode_hex, serde_hex, KeyId};

pub const MODULE_NAME: &str = "tss";

/// External contract bytecode the module hands to the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractParams {
    #[serde(with = "serde_hex")]
    pub gateway: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub token: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub burnable: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    pub params: Params,
    pub contracts: ContractParams,
    pub keys: Vec<KeyInfo>,
    pub validators: ValidatorSnapshot,
    /// Joint FROST keys the signing engine aggregates under, by key id.
    pub frost_keys: BTreeMap<KeyId, FrostKey<EvenY>>,
    pub pending_batches: PendingBatches,
}

impl GenesisState {
    /// Reads the module section of a genesis document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let doc = read_document(path)?;
        let section = doc
            .get("app_state")
            .and_then(|app| app.get(MODULE_NAME))
            .cloned()
            .ok_or_else(|| {
                TssError::Genesis(format!(
                    "{} has no app_state.{} section",
                    path.display(),
                    MODULE_NAME
                ))
            })?;
        let state: GenesisState = serde_json::from_value(section).map_err(|e| {
            TssError::Genesis(format!("{}: {}", path.display(), e))
        })?;
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        let mut seen = BTreeMap::new();
        for key in &self.keys {
            if seen.insert(&key.id, ()).is_some() {
                return Err(TssError::Genesis(format!("key {} listed twice", key.id)));
            }
            if key.threshold == 0 {
                return Err(TssError::InvalidThreshold {
                    key: key.id.clone(),
                    threshold: 0,
                });
            }
            if let Some(frost_key) = self.frost_keys.get(&key.id) {
                if key.holders.len() != frost_key.n_signers() {
                    return Err(TssError::Genesis(format!(
                        "key {} lists {} holders but its FROST key has {} shares",
                        key.id,
                        key.holders.len(),
                        frost_key.n_signers()
                    )));
                }
            }
        }
        if let Some(orphan) = self.frost_keys.keys().find(|id| !seen.contains_key(id)) {
            return Err(TssError::Genesis(format!(
                "FROST key {} has no key entry",
                orphan
            )));
        }
        Ok(())
    }

    pub fn key_registry(&self) -> KeyRegistry {
        KeyRegistry::new(self.keys.iter().cloned())
    }
}

/// Contract artifacts to seed. Missing entries leave the current value alone.
#[derive(Debug, Clone, Default)]
pub struct ContractFiles {
    pub gateway: Option<PathBuf>,
    pub token: Option<PathBuf>,
    pub burnable: Option<PathBuf>,
}

/// Reads each contract artifact and writes its bytecode into the genesis file at `genesis_path`.
///
/// Every file is read and decoded before the genesis file is touched, so a bad artifact leaves it
/// unchanged.
pub fn set_genesis_contracts(genesis_path: &Path, files: &ContractFiles) -> Result<ContractParams> {
    let mut doc = read_document(genesis_path)?;
    let gateway = files.gateway.as_deref().map(read_bytecode).transpose()?;
    let token = files.token.as_deref().map(read_bytecode).transpose()?;
    let burnable = files.burnable.as_deref().map(read_bytecode).transpose()?;

    let section = doc
        .as_object_mut()
        .ok_or_else(|| TssError::Genesis("genesis document is not an object".into()))?
        .entry("app_state")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
        .ok_or_else(|| TssError::Genesis("app_state is not an object".into()))?
        .entry(MODULE_NAME)
        .or_insert_with(|| Value::Object(Default::default()));

    let mut state: GenesisState = serde_json::from_value(section.clone())
        .map_err(|e| TssError::Genesis(format!("app_state.{}: {}", MODULE_NAME, e)))?;
    if let Some(code) = gateway {
        state.contracts.gateway = code;
    }
    if let Some(code) = token {
        state.contracts.token = code;
    }
    if let Some(code) = burnable {
        state.contracts.burnable = code;
    }
    *section = serde_json::to_value(&state)
        .map_err(|e| TssError::Genesis(format!("encode genesis: {}", e)))?;

    let out = serde_json::to_string_pretty(&doc)
        .map_err(|e| TssError::Genesis(format!("encode genesis: {}", e)))?;
    fs::write(genesis_path, out).map_err(|e| {
        TssError::Genesis(format!("failed to write {}: {}", genesis_path.display(), e))
    })?;
    info!(
        path = %genesis_path.display(),
        gateway = state.contracts.gateway.len(),
        token = state.contracts.token.len(),
        burnable = state.contracts.burnable.len(),
        "seeded contract bytecode"
    );
    Ok(state.contracts)
}

fn read_document(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .map_err(|e| TssError::Genesis(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| TssError::Genesis(format!("failed to parse {}: {}", path.display(), e)))
}

/// A compiled artifact: JSON with a hex `bytecode` field, or a bare hex file.
fn read_bytecode(path: &Path) -> Result<Vec<u8>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| TssError::Genesis(format!("failed to read {}: {}", path.display(), e)))?;
    let hex_code = match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(artifact)) => match artifact.get("bytecode") {
            Some(Value::String(code)) => code.clone(),
            _ => {
                return Err(TssError::Genesis(format!(
                    "{} has no string bytecode field",
                    path.display()
                )))
            }
        },
        _ => contents.trim().to_string(),
    };
    let code = decode_hex(&hex_code)
        .map_err(|e| TssError::Genesis(format!("{}: invalid bytecode: {}", path.display(), e)))?;
    if code.is_empty() {
        return Err(TssError::Genesis(format!("{}: empty bytecode", path.display())));
    }
    Ok(code)
}
