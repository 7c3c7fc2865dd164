//! Core primitives for the ERC20 token ledger.
//!
//! The crate is the state-transition logic of a fungible token and nothing
//! else:
//!
//! * [`ledger`]: the [`TokenLedger`] itself, with balances, total supply,
//!   owner-gated mint/burn and holder transfers.
//! * [`address`]: fixed-width 20-byte identities and the zero sentinel.
//! * [`amount`]: 256-bit raw amounts and conversion to and from display
//!   units.
//! * [`event`]: the `Transfer` notification returned by every mutation.
//!
//! Signing, transaction ordering and persistence belong to the host that
//! drives the ledger (see the `erc20` binary for a local one).

pub mod address;
pub mod amount;
pub mod event;
pub mod ledger;

mod error;

pub use address::{Address, AddressError};
pub use amount::{Amount, AmountError};
pub use error::LedgerError;
pub use event::Transfer;
pub use ledger::{LedgerSnapshot, TokenLedger};
