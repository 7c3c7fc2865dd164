use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{address::Address, amount::Amount, error::LedgerError, event::Transfer};

/// Full, serializable state of a ledger together with its state root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub owner: Address,
    pub total_supply: Amount,
    pub balances: BTreeMap<Address, Amount>,
    pub state_root: [u8; 32],
}

/// Fungible token ledger following the ERC20 accounting model.
///
/// Every mutation either completes and returns exactly one [`Transfer`], or
/// fails and leaves the ledger untouched. Preconditions are all checked before
/// the first write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLedger {
    name: String,
    symbol: String,
    decimals: u8,
    owner: Address,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
}

impl TokenLedger {
    /// Create an empty ledger owned by the constructing identity.
    pub fn new(
        owner: Address,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            decimals,
            owner,
            total_supply: Amount::zero(),
            balances: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Holders with a non-zero balance, in address order.
    pub fn holders(&self) -> impl Iterator<Item = (Address, Amount)> + '_ {
        self.balances.iter().map(|(address, balance)| (*address, *balance))
    }

    /// Create `amount` new units and credit them to `to`. Owner only.
    pub fn mint(
        &mut self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        self.credit_new(caller, to, amount)
            .inspect(|event| debug!(to = %event.to, value = %event.value, "mint applied"))
            .inspect_err(|err| warn!(%caller, %to, %amount, error = %err, "mint rejected"))
    }

    /// Destroy `amount` units held by `from`. Owner only.
    pub fn burn(
        &mut self,
        caller: Address,
        from: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        self.debit_destroy(caller, from, amount)
            .inspect(|event| debug!(from = %event.from, value = %event.value, "burn applied"))
            .inspect_err(|err| warn!(%caller, %from, %amount, error = %err, "burn rejected"))
    }

    fn credit_new(
        &mut self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        self.ensure_owner(&caller, "mint")?;
        let balance = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        self.set_balance(to, balance);
        self.total_supply = supply;
        Ok(Transfer {
            from: Address::ZERO,
            to,
            value: amount,
        })
    }

    fn debit_destroy(
        &mut self,
        caller: Address,
        from: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        self.ensure_owner(&caller, "burn")?;
        if from.is_zero() {
            return Err(LedgerError::InvalidAddress(
                "burn from the zero address is not allowed",
            ));
        }
        let balance = self
            .balance_of(&from)
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        self.set_balance(from, balance);
        self.total_supply = supply;
        Ok(Transfer {
            from,
            to: Address::ZERO,
            value: amount,
        })
    }

    /// Move `amount` units from the caller to `to`.
    pub fn transfer(
        &mut self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        self.move_balance(caller, to, amount)
            .inspect(|event| {
                debug!(from = %event.from, to = %event.to, value = %event.value, "transfer applied")
            })
            .inspect_err(|err| warn!(from = %caller, %to, %amount, error = %err, "transfer rejected"))
    }

    fn move_balance(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::InvalidAddress(
                "transfer to the zero address is not allowed",
            ));
        }
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }

        if from != to {
            let to_balance = self
                .balance_of(&to)
                .checked_add(amount)
                .ok_or(LedgerError::ArithmeticOverflow)?;
            self.set_balance(from, from_balance - amount);
            self.set_balance(to, to_balance);
        }
        Ok(Transfer {
            from,
            to,
            value: amount,
        })
    }

    fn ensure_owner(&self, caller: &Address, operation: &'static str) -> Result<(), LedgerError> {
        if *caller != self.owner {
            return Err(LedgerError::Unauthorized { operation });
        }
        Ok(())
    }

    fn set_balance(&mut self, account: Address, balance: Amount) {
        if balance.is_zero() {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.name,
            &self.symbol,
            self.decimals,
            &self.owner,
            self.total_supply,
            &self.balances,
        )
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            owner: self.owner,
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuild a ledger from a snapshot, checking every invariant first.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let mut sum = Amount::zero();
        for (address, balance) in &snapshot.balances {
            if balance.is_zero() {
                return Err(LedgerError::CorruptState(format!(
                    "zero balance recorded for {address}"
                )));
            }
            sum = sum.checked_add(*balance).ok_or_else(|| {
                LedgerError::CorruptState("balances overflow 256 bits".into())
            })?;
        }
        if sum != snapshot.total_supply {
            return Err(LedgerError::CorruptState(format!(
                "total supply {} does not match sum of balances {sum}",
                snapshot.total_supply
            )));
        }

        let ledger = Self {
            name: snapshot.name,
            symbol: snapshot.symbol,
            decimals: snapshot.decimals,
            owner: snapshot.owner,
            total_supply: snapshot.total_supply,
            balances: snapshot.balances,
        };
        if ledger.state_root() != snapshot.state_root {
            return Err(LedgerError::CorruptState("state root mismatch".into()));
        }
        Ok(ledger)
    }
}

fn amount_bytes(amount: Amount) -> [u8; 32] {
    let mut out = [0u8; 32];
    amount.to_big_endian(&mut out);
    out
}

fn compute_state_root(
    name: &str,
    symbol: &str,
    decimals: u8,
    owner: &Address,
    total_supply: Amount,
    balances: &BTreeMap<Address, Amount>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(balances.len() + 1);

    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update((name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.update((symbol.len() as u64).to_le_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update([decimals]);
    hasher.update(owner.as_bytes());
    hasher.update(amount_bytes(total_supply));
    leaves.push(hasher.finalize().into());

    for (address, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"bal");
        hasher.update(address.as_bytes());
        hasher.update(amount_bytes(*balance));
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"erc20-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
