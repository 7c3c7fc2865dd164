//! File-backed stand-in for the blockchain runtime a token contract runs on.
//!
//! Layout under the chain root:
//!
//! * `accounts.json`: next expected nonce per sender.
//! * `contracts/<address>.json`: ledger snapshot of each deployed contract.
//! * `receipts/<tx-hash>.json`: receipt of every accepted transaction.
//!
//! * `chain.lock`: held exclusively while a transaction is submitted.
//!
//! Transactions execute one at a time, across handles and processes; a
//! contract file is only rewritten when its ledger operation succeeded.

pub mod tx;

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use erc20_core::{Address, LedgerError, LedgerSnapshot, TokenLedger, Transfer};
use fs4::fs_std::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub use tx::{signer_address, Call, SignedTransaction, TxError};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Transaction(#[from] TxError),
    #[error("nonce mismatch for {account}: expected {expected}, got {actual}")]
    NonceMismatch {
        account: Address,
        expected: u64,
        actual: u64,
    },
    #[error("{0} call requires a contract address")]
    MissingContract(&'static str),
    #[error("deploy call must not target a contract")]
    UnexpectedContract,
    #[error("unknown contract {0}")]
    UnknownContract(Address),
    #[error("contract already deployed at {0}")]
    ContractExists(Address),
    #[error("invalid transaction hash {0:?}: expected 64 hex digits")]
    InvalidTransactionHash(String),
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub sender: Address,
    pub contract: Address,
    pub nonce: u64,
    pub status: ReceiptStatus,
    pub logs: Vec<Transfer>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

#[derive(Default, Serialize, Deserialize)]
struct AccountsFile {
    nonces: BTreeMap<Address, u64>,
}

impl AccountsFile {
    fn nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }
}

// Ledger state after a call ran in memory, before anything is written.
type Staged = Result<(TokenLedger, Option<Transfer>), LedgerError>;

pub struct LocalChain {
    root: PathBuf,
}

impl LocalChain {
    /// Open (creating if needed) the chain stored under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ChainError> {
        let root = root.into();
        for dir in [root.join("contracts"), root.join("receipts")] {
            fs::create_dir_all(&dir).map_err(|source| ChainError::Io { path: dir, source })?;
        }
        debug!(root = %root.display(), "chain opened");
        Ok(Self { root })
    }

    /// Nonce the next transaction from `account` must carry.
    pub fn nonce(&self, account: &Address) -> Result<u64, ChainError> {
        Ok(self.load_accounts()?.nonce(account))
    }

    pub fn ledger(&self, contract: &Address) -> Result<TokenLedger, ChainError> {
        let path = self.contract_path(contract);
        if !path.exists() {
            return Err(ChainError::UnknownContract(*contract));
        }
        let snapshot: LedgerSnapshot = read_json(&path)?;
        Ok(TokenLedger::restore(snapshot)?)
    }

    pub fn receipt(&self, tx_hash: &str) -> Result<Receipt, ChainError> {
        let key = tx_hash.trim().trim_start_matches("0x").to_ascii_lowercase();
        if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChainError::InvalidTransactionHash(tx_hash.to_string()));
        }
        let path = self.root.join("receipts").join(format!("{key}.json"));
        if !path.exists() {
            return Err(ChainError::UnknownTransaction(tx_hash.to_string()));
        }
        read_json(&path)
    }

    /// Verify, execute and record a transaction.
    ///
    /// Submissions hold an exclusive lock on the chain directory and read the
    /// nonces fresh from disk. The sender nonce is stored before any contract
    /// state, so effects that reached disk can never be replayed. A ledger
    /// failure, or a contract write failing after the nonce was stored, yields a
    /// reverted receipt; every other failure leaves the chain untouched.
    pub fn submit(&self, tx: &SignedTransaction) -> Result<Receipt, ChainError> {
        let sender = tx.verify()?;
        let _lock = self.lock()?;

        let mut accounts = self.load_accounts()?;
        let expected = accounts.nonce(&sender);
        if tx.nonce != expected {
            return Err(ChainError::NonceMismatch {
                account: sender,
                expected,
                actual: tx.nonce,
            });
        }

        let (contract, staged) = self.stage(tx, sender)?;

        accounts.nonces.insert(sender, expected + 1);
        write_json(&self.accounts_path(), &accounts)?;

        let outcome = staged
            .map_err(|err| err.to_string())
            .and_then(|(ledger, event)| {
                self.store_ledger(&contract, &ledger)
                    .map(|()| event)
                    .map_err(|err| format!("state write failed: {err}"))
            });

        let (status, logs): (ReceiptStatus, Vec<Transfer>) = match outcome {
            Ok(event) => {
                if let Call::Deploy { name, symbol, decimals } = &tx.call {
                    info!(%contract, owner = %sender, name = %name, symbol = %symbol, decimals, "contract deployed");
                }
                (ReceiptStatus::Success, event.into_iter().collect())
            }
            Err(reason) => {
                warn!(%contract, %sender, call = tx.call.name(), %reason, "transaction reverted");
                (ReceiptStatus::Reverted { reason }, Vec::new())
            }
        };

        let receipt = Receipt {
            tx_hash: tx.hash_hex(),
            sender,
            contract,
            nonce: tx.nonce,
            status,
            logs,
        };
        let receipt_path = self
            .root
            .join("receipts")
            .join(format!("{}.json", hex::encode(tx.hash())));
        write_json(&receipt_path, &receipt)?;
        debug!(tx = %receipt.tx_hash, success = receipt.is_success(), "transaction recorded");
        Ok(receipt)
    }

    // Resolve the target contract and run the call against an in-memory copy.
    fn stage(
        &self,
        tx: &SignedTransaction,
        sender: Address,
    ) -> Result<(Address, Staged), ChainError> {
        match &tx.call {
            Call::Deploy {
                name,
                symbol,
                decimals,
            } => {
                if tx.contract.is_some() {
                    return Err(ChainError::UnexpectedContract);
                }
                let contract = contract_address(&sender, tx.nonce);
                if self.contract_path(&contract).exists() {
                    return Err(ChainError::ContractExists(contract));
                }
                let ledger = TokenLedger::new(sender, name.clone(), symbol.clone(), *decimals);
                Ok((contract, Ok((ledger, None))))
            }
            Call::Mint { to, amount } => {
                self.execute(tx, |ledger| ledger.mint(sender, *to, *amount))
            }
            Call::Burn { from, amount } => {
                self.execute(tx, |ledger| ledger.burn(sender, *from, *amount))
            }
            Call::Transfer { to, amount } => {
                self.execute(tx, |ledger| ledger.transfer(sender, *to, *amount))
            }
        }
    }

    fn execute<F>(&self, tx: &SignedTransaction, op: F) -> Result<(Address, Staged), ChainError>
    where
        F: FnOnce(&mut TokenLedger) -> Result<Transfer, LedgerError>,
    {
        let contract = tx
            .contract
            .ok_or(ChainError::MissingContract(tx.call.name()))?;
        let mut ledger = self.ledger(&contract)?;
        let outcome = op(&mut ledger).map(|event| (ledger, Some(event)));
        Ok((contract, outcome))
    }

    // Held until the returned file is dropped.
    fn lock(&self) -> Result<fs::File, ChainError> {
        let path = self.root.join("chain.lock");
        let io_err = |source: std::io::Error| ChainError::Io {
            path: path.clone(),
            source,
        };
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(file)
    }

    fn load_accounts(&self) -> Result<AccountsFile, ChainError> {
        let path = self.accounts_path();
        if !path.exists() {
            return Ok(AccountsFile::default());
        }
        read_json(&path)
    }

    fn accounts_path(&self) -> PathBuf {
        self.root.join("accounts.json")
    }

    fn contract_path(&self, contract: &Address) -> PathBuf {
        self.root
            .join("contracts")
            .join(format!("{}.json", hex::encode(contract.as_bytes())))
    }

    fn store_ledger(&self, contract: &Address, ledger: &TokenLedger) -> Result<(), ChainError> {
        write_json(&self.contract_path(contract), &ledger.snapshot())
    }
}

/// Address of the contract `deployer` creates with transaction `nonce`.
pub fn contract_address(deployer: &Address, nonce: u64) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"erc20-contract");
    hasher.update(deployer.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::new(bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ChainError> {
    let bytes = fs::read(path).map_err(|source| ChainError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ChainError::Json {
        path: path.to_path_buf(),
        source,
    })
}

// Write to a sibling temp file and rename so readers never see a partial file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ChainError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| ChainError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source: std::io::Error| ChainError::Io {
        path: tmp.clone(),
        source,
    };
    let mut f = fs::File::create(&tmp).map_err(io_err)?;
    f.write_all(&bytes).map_err(io_err)?;
    f.sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(|source| ChainError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::SigningKey;
    use erc20_core::Amount;
    use rand::rngs::OsRng;

    fn e18(n: u64) -> Amount {
        Amount::from(n) * Amount::exp10(18)
    }

    struct Actor {
        sk: SigningKey,
    }

    impl Actor {
        fn new() -> Self {
            Self {
                sk: SigningKey::generate(&mut OsRng),
            }
        }

        fn address(&self) -> Address {
            signer_address(&self.sk)
        }

        fn send(
            &self,
            chain: &LocalChain,
            call: Call,
            contract: Option<Address>,
        ) -> Result<Receipt, ChainError> {
            let nonce = chain.nonce(&self.address())?;
            chain.submit(&SignedTransaction::sign(&self.sk, call, contract, nonce))
        }
    }

    fn deploy(chain: &LocalChain, owner: &Actor) -> Address {
        let receipt = owner
            .send(
                chain,
                Call::Deploy {
                    name: "Zenny".into(),
                    symbol: "ZNY".into(),
                    decimals: 18,
                },
                None,
            )
            .unwrap();
        assert!(receipt.is_success());
        assert!(receipt.logs.is_empty());
        receipt.contract
    }

    #[test]
    fn deploy_sets_owner_to_deployer() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let (account0, account1) = (Actor::new(), Actor::new());

        let first = deploy(&chain, &account0);
        let second = deploy(&chain, &account1);
        assert_ne!(first, second);

        let ledger = chain.ledger(&first).unwrap();
        assert_eq!(ledger.owner(), account0.address());
        assert_eq!(ledger.name(), "Zenny");
        assert_eq!(ledger.symbol(), "ZNY");
        assert_eq!(ledger.decimals(), 18);
        assert_eq!(ledger.total_supply(), Amount::zero());
        assert_eq!(chain.ledger(&second).unwrap().owner(), account1.address());
    }

    #[test]
    fn mint_and_transfer_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (owner, b, c) = (Actor::new(), Actor::new(), Actor::new());
        let contract = {
            let chain = LocalChain::open(dir.path()).unwrap();
            let contract = deploy(&chain, &owner);
            let receipt = owner
                .send(
                    &chain,
                    Call::Mint {
                        to: b.address(),
                        amount: e18(10),
                    },
                    Some(contract),
                )
                .unwrap();
            assert_eq!(
                receipt.logs,
                vec![Transfer {
                    from: Address::ZERO,
                    to: b.address(),
                    value: e18(10)
                }]
            );
            contract
        };

        let chain = LocalChain::open(dir.path()).unwrap();
        let receipt = b
            .send(
                &chain,
                Call::Transfer {
                    to: c.address(),
                    amount: e18(7),
                },
                Some(contract),
            )
            .unwrap();
        assert!(receipt.is_success());
        let ledger = chain.ledger(&contract).unwrap();
        assert_eq!(ledger.balance_of(&b.address()), e18(3));
        assert_eq!(ledger.balance_of(&c.address()), e18(7));
        assert_eq!(ledger.total_supply(), e18(10));
        assert_eq!(chain.receipt(&receipt.tx_hash).unwrap(), receipt);
    }

    #[test]
    fn reverted_call_keeps_state_and_consumes_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let (owner, intruder) = (Actor::new(), Actor::new());
        let contract = deploy(&chain, &owner);
        let root_before = chain.ledger(&contract).unwrap().state_root();

        let receipt = intruder
            .send(
                &chain,
                Call::Mint {
                    to: intruder.address(),
                    amount: e18(1),
                },
                Some(contract),
            )
            .unwrap();
        assert_eq!(
            receipt.status,
            ReceiptStatus::Reverted {
                reason: "only contract owner can call mint".into()
            }
        );
        assert!(receipt.logs.is_empty());
        assert_eq!(chain.nonce(&intruder.address()).unwrap(), 1);
        assert_eq!(chain.ledger(&contract).unwrap().state_root(), root_before);
    }

    #[test]
    fn replayed_transaction_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let contract = deploy(&chain, &owner);
        let tx = SignedTransaction::sign(
            &owner.sk,
            Call::Mint {
                to: owner.address(),
                amount: e18(1),
            },
            Some(contract),
            1,
        );
        chain.submit(&tx).unwrap();
        let err = chain.submit(&tx).unwrap_err();
        assert!(matches!(
            err,
            ChainError::NonceMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert_eq!(
            chain.ledger(&contract).unwrap().balance_of(&owner.address()),
            e18(1)
        );
    }

    #[test]
    fn tampered_transaction_is_rejected_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let (owner, other) = (Actor::new(), Actor::new());
        let contract = deploy(&chain, &owner);
        let mut tx = SignedTransaction::sign(
            &owner.sk,
            Call::Mint {
                to: owner.address(),
                amount: e18(1),
            },
            Some(contract),
            1,
        );
        tx.call = Call::Mint {
            to: other.address(),
            amount: e18(1),
        };
        assert!(matches!(
            chain.submit(&tx),
            Err(ChainError::Transaction(TxError::InvalidSignature))
        ));
        assert_eq!(chain.nonce(&owner.address()).unwrap(), 1);
    }

    #[test]
    fn calls_need_a_deployed_contract() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let mint = Call::Mint {
            to: owner.address(),
            amount: e18(1),
        };
        assert!(matches!(
            owner.send(&chain, mint.clone(), None),
            Err(ChainError::MissingContract("mint"))
        ));
        let ghost = Address::new([0x42; 20]);
        assert!(matches!(
            owner.send(&chain, mint, Some(ghost)),
            Err(ChainError::UnknownContract(addr)) if addr == ghost
        ));
        assert_eq!(chain.nonce(&owner.address()).unwrap(), 0);
    }

    #[test]
    fn tampered_contract_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let contract = deploy(&chain, &owner);
        owner
            .send(
                &chain,
                Call::Mint {
                    to: owner.address(),
                    amount: e18(5),
                },
                Some(contract),
            )
            .unwrap();

        let path = chain.contract_path(&contract);
        let mut snapshot: LedgerSnapshot = read_json(&path).unwrap();
        snapshot.total_supply = e18(6);
        write_json(&path, &snapshot).unwrap();
        assert!(matches!(
            chain.ledger(&contract),
            Err(ChainError::Ledger(LedgerError::CorruptState(_)))
        ));
    }

    #[test]
    fn contract_address_depends_on_deployer_and_nonce() {
        let a = Address::new([1u8; 20]);
        let b = Address::new([2u8; 20]);
        assert_eq!(contract_address(&a, 0), contract_address(&a, 0));
        assert_ne!(contract_address(&a, 0), contract_address(&a, 1));
        assert_ne!(contract_address(&a, 0), contract_address(&b, 0));
    }

    #[test]
    fn contract_address_is_tagged_digest_suffix() {
        let deployer = Address::new([7u8; 20]);
        let mut hasher = Sha256::new();
        hasher.update(b"erc20-contract");
        hasher.update(deployer.as_bytes());
        hasher.update(3u64.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        assert_eq!(contract_address(&deployer, 3).as_bytes()[..], digest[12..]);
    }

    fn mint_tx(owner: &Actor, contract: Address, nonce: u64) -> SignedTransaction {
        SignedTransaction::sign(
            &owner.sk,
            Call::Mint {
                to: owner.address(),
                amount: e18(1),
            },
            Some(contract),
            nonce,
        )
    }

    #[test]
    fn failed_nonce_write_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let contract = deploy(&chain, &owner);
        let tx = mint_tx(&owner, contract, 1);

        let blocker = dir.path().join("accounts.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(matches!(chain.submit(&tx), Err(ChainError::Io { .. })));
        assert_eq!(chain.nonce(&owner.address()).unwrap(), 1);
        assert_eq!(
            chain.ledger(&contract).unwrap().balance_of(&owner.address()),
            Amount::zero()
        );

        fs::remove_dir(&blocker).unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        assert!(chain.submit(&tx).unwrap().is_success());
        assert!(matches!(
            chain.submit(&tx),
            Err(ChainError::NonceMismatch { expected: 2, .. })
        ));
        let ledger = chain.ledger(&contract).unwrap();
        assert_eq!(ledger.balance_of(&owner.address()), e18(1));
        assert_eq!(ledger.total_supply(), e18(1));
    }

    #[test]
    fn failed_state_write_reverts_and_consumes_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let contract = deploy(&chain, &owner);
        let tx = mint_tx(&owner, contract, 1);

        let blocker = chain.contract_path(&contract).with_extension("json.tmp");
        fs::create_dir(&blocker).unwrap();
        let receipt = chain.submit(&tx).unwrap();
        match &receipt.status {
            ReceiptStatus::Reverted { reason } => assert!(reason.starts_with("state write failed")),
            ReceiptStatus::Success => panic!("expected revert"),
        }
        assert!(receipt.logs.is_empty());

        fs::remove_dir(&blocker).unwrap();
        assert!(matches!(
            chain.submit(&tx),
            Err(ChainError::NonceMismatch { expected: 2, .. })
        ));
        assert_eq!(chain.ledger(&contract).unwrap().total_supply(), Amount::zero());
    }

    #[test]
    fn handles_opened_earlier_do_not_roll_back_nonces() {
        let dir = tempfile::tempdir().unwrap();
        let a = LocalChain::open(dir.path()).unwrap();
        let stale = LocalChain::open(dir.path()).unwrap();
        let (owner, other) = (Actor::new(), Actor::new());

        let contract = deploy(&a, &owner);
        let tx = mint_tx(&owner, contract, 1);
        assert!(a.submit(&tx).unwrap().is_success());
        deploy(&stale, &other);

        let fresh = LocalChain::open(dir.path()).unwrap();
        assert!(matches!(
            fresh.submit(&tx),
            Err(ChainError::NonceMismatch { expected: 2, .. })
        ));
        assert_eq!(fresh.nonce(&other.address()).unwrap(), 1);
        assert_eq!(
            fresh.ledger(&contract).unwrap().balance_of(&owner.address()),
            e18(1)
        );
    }

    #[test]
    fn concurrent_submitters_keep_every_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let actors: Vec<Actor> = (0..4).map(|_| Actor::new()).collect();
        std::thread::scope(|scope| {
            for actor in &actors {
                let root = dir.path().to_path_buf();
                scope.spawn(move || {
                    let chain = LocalChain::open(root).unwrap();
                    for _ in 0..5 {
                        deploy(&chain, actor);
                    }
                });
            }
        });

        let chain = LocalChain::open(dir.path()).unwrap();
        for actor in &actors {
            assert_eq!(chain.nonce(&actor.address()).unwrap(), 5);
        }
        assert_eq!(fs::read_dir(dir.path().join("contracts")).unwrap().count(), 20);
    }

    #[test]
    fn receipt_lookup_rejects_non_hash_input() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(dir.path()).unwrap();
        let owner = Actor::new();
        let contract = deploy(&chain, &owner);

        let sneaky = format!("../contracts/{}", hex::encode(contract.as_bytes()));
        assert!(matches!(
            chain.receipt(&sneaky),
            Err(ChainError::InvalidTransactionHash(_))
        ));
        assert!(matches!(
            chain.receipt("0x1234"),
            Err(ChainError::InvalidTransactionHash(_))
        ));
        let unknown = format!("0x{}", "ab".repeat(32));
        assert!(matches!(
            chain.receipt(&unknown),
            Err(ChainError::UnknownTransaction(_))
        ));
    }
}
