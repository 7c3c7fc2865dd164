use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{address::Address, amount::Amount};

/// Notification produced by every successful balance-affecting operation.
///
/// `from` is the zero address for a mint and `to` is the zero address for a
/// burn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub value: Amount,
}

impl Transfer {
    pub const NAME: &'static str = "Transfer";

    pub fn is_mint(&self) -> bool {
        self.from.is_zero()
    }

    pub fn is_burn(&self) -> bool {
        self.to.is_zero()
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.from, self.to, self.value)
    }
}
