//! Unspent transaction outputs: ownership, scripts, spatial affinity.

use sha2::{Digest, Sha256};

use crate::coordinate::Coordinate;
use crate::error::ChainError;

pub type Address = String;

/// Script controlling how a UTXO may be spent. The `"OP_..."` textual form
/// used for hashing and wire encoding is a serialization artifact only.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Script {
    CheckSig,
    Return,
    ContractCall(String),
    FractalSplit,
    FractalMerge,
}

impl Script {
    pub fn as_canonical(&self) -> String {
        match self {
            Script::CheckSig => "OP_CHECKSIG".to_string(),
            Script::Return => "OP_RETURN".to_string(),
            Script::ContractCall(addr) => format!("OP_CONTRACTCALL:{addr}"),
            Script::FractalSplit => "OP_FRACTAL_SPLIT".to_string(),
            Script::FractalMerge => "OP_FRACTAL_MERGE".to_string(),
        }
    }
}

/// Verifies that `sig` over `msg` (the spending UTXO's id) was produced by
/// the keypair behind `pubkey`, for an owner address. Modeled as an
/// injected capability rather than a global so the core never dials out to
/// a concrete crypto stack; see [`crate::crypto`] for a placeholder.
pub trait SignatureVerifier {
    fn verify(&self, owner: &str, pubkey: &[u8], sig: &[u8], msg: &str) -> bool;
}

/// Result of invoking the contract collaborator.
#[derive(Debug, Clone)]
pub struct ContractCallResult {
    pub state_root: String,
    pub gas_used: u64,
    pub error: Option<String>,
}

/// Opaque EVM-style contract collaborator, invoked synchronously.
pub trait ContractEngine {
    fn call_contract(
        &self,
        addr: &str,
        input_data: &[u8],
        caller: &str,
        gas_limit: u64,
    ) -> ContractCallResult;
}

/// Context supplied to [`Utxo::execute_script`].
pub struct ExecutionContext<'a> {
    pub current_height: u64,
    pub siblings: &'a [Utxo],
    pub input_data: &'a [u8],
    pub return_data: &'a [u8],
    pub contract_engine: Option<&'a dyn ContractEngine>,
}

/// Outcome of executing a UTXO's script.
pub struct ScriptResult {
    pub status: bool,
    pub data: Option<Vec<u8>>,
    pub new_state_root: Option<String>,
    pub gas_used: Option<u64>,
    pub new_utxos: Vec<Utxo>,
    pub error: Option<String>,
}

impl ScriptResult {
    fn ok() -> Self {
        ScriptResult {
            status: true,
            data: None,
            new_state_root: None,
            gas_used: None,
            new_utxos: Vec::new(),
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        ScriptResult {
            status: false,
            data: None,
            new_state_root: None,
            gas_used: None,
            new_utxos: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// An unspent output: value, owner, spending script, and spatial position.
/// Constructed once; every field is immutable thereafter.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Utxo {
    pub owner: Address,
    pub amount: f64,
    pub coordinate: Coordinate,
    pub creation_height: u64,
    pub script: Script,
    pub contract_state_hash: Option<String>,
    pub gas_limit: Option<u64>,
    utxo_id: String,
}

impl Utxo {
    pub fn new(
        owner: Address,
        amount: f64,
        coordinate: Coordinate,
        creation_height: u64,
        script: Script,
        contract_state_hash: Option<String>,
        gas_limit: Option<u64>,
    ) -> Result<Self, ChainError> {
        if amount <= 0.0 {
            return Err(ChainError::BadScript("UTXO amount must be positive".into()));
        }
        if matches!(script, Script::ContractCall(_)) {
            if contract_state_hash.is_none() {
                return Err(ChainError::BadScript(
                    "contract_state_hash required for CONTRACTCALL".into(),
                ));
            }
            match gas_limit {
                None | Some(0) => {
                    return Err(ChainError::BadScript(
                        "gas_limit required for CONTRACTCALL".into(),
                    ))
                }
                _ => {}
            }
        }

        let utxo_id = compute_utxo_id(
            &owner,
            amount,
            &script,
            coordinate.hash(),
            creation_height,
            contract_state_hash.as_deref(),
            gas_limit,
        );

        Ok(Utxo {
            owner,
            amount,
            coordinate,
            creation_height,
            script,
            contract_state_hash,
            gas_limit,
            utxo_id,
        })
    }

    pub fn id(&self) -> &str {
        &self.utxo_id
    }

    pub fn shard_affinity(&self) -> u32 {
        self.coordinate.shard_id()
    }

    /// `false` for `Return`, `true` unconditionally for `ContractCall`
    /// (the contract enforces state), otherwise delegates to `verifier`.
    pub fn can_spend_with(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        verifier: &dyn SignatureVerifier,
    ) -> bool {
        match self.script {
            Script::Return => false,
            Script::ContractCall(_) => true,
            Script::CheckSig | Script::FractalSplit | Script::FractalMerge => {
                verifier.verify(&self.owner, pubkey, sig, &self.utxo_id)
            }
        }
    }

    pub fn execute_script(&self, ctx: &ExecutionContext) -> ScriptResult {
        match &self.script {
            Script::CheckSig => ScriptResult::ok(),
            Script::Return => {
                let mut r = ScriptResult::ok();
                r.data = Some(ctx.return_data.to_vec());
                r
            }
            Script::ContractCall(addr) => {
                let Some(engine) = ctx.contract_engine else {
                    return ScriptResult::fail("contract engine not provided");
                };
                let gas_limit = self.gas_limit.unwrap_or(0);
                let result = engine.call_contract(addr, ctx.input_data, &self.owner, gas_limit);
                ScriptResult {
                    status: result.error.is_none(),
                    data: None,
                    new_state_root: Some(result.state_root),
                    gas_used: Some(result.gas_used),
                    new_utxos: Vec::new(),
                    error: result.error,
                }
            }
            Script::FractalSplit => {
                let split_amount = self.amount / 3.0;
                let mut new_utxos = Vec::with_capacity(3);
                for child_coord in self.coordinate.children() {
                    match Utxo::new(
                        self.owner.clone(),
                        split_amount,
                        child_coord,
                        ctx.current_height,
                        Script::CheckSig,
                        None,
                        None,
                    ) {
                        Ok(u) => new_utxos.push(u),
                        Err(e) => return ScriptResult::fail(e.to_string()),
                    }
                }
                let mut r = ScriptResult::ok();
                r.new_utxos = new_utxos;
                r
            }
            Script::FractalMerge => {
                if ctx.siblings.is_empty() {
                    return ScriptResult::fail("no sibling UTXOs provided for merge");
                }
                let total: f64 = self.amount + ctx.siblings.iter().map(|s| s.amount).sum::<f64>();
                match Utxo::new(
                    self.owner.clone(),
                    total,
                    self.coordinate.parent(),
                    ctx.current_height,
                    Script::CheckSig,
                    None,
                    None,
                ) {
                    Ok(merged) => {
                        let mut r = ScriptResult::ok();
                        r.new_utxos = vec![merged];
                        r
                    }
                    Err(e) => ScriptResult::fail(e.to_string()),
                }
            }
        }
    }
}

fn compute_utxo_id(
    owner: &str,
    amount: f64,
    script: &Script,
    coord_hash: &str,
    creation_height: u64,
    contract_state_hash: Option<&str>,
    gas_limit: Option<u64>,
) -> String {
    let mut parts = vec![
        owner.to_string(),
        format!("{amount:.8}"),
        script.as_canonical(),
        coord_hash.to_string(),
        creation_height.to_string(),
    ];
    if let Some(state_hash) = contract_state_hash {
        parts.push(state_hash.to_string());
        parts.push(gas_limit.unwrap_or(0).to_string());
    }
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}
