use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use erc20_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Operation a transaction asks the chain to perform.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    Deploy {
        name: String,
        symbol: String,
        decimals: u8,
    },
    Mint {
        to: Address,
        amount: Amount,
    },
    Burn {
        from: Address,
        amount: Amount,
    },
    Transfer {
        to: Address,
        amount: Amount,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Deploy { .. } => "deploy",
            Call::Mint { .. } => "mint",
            Call::Burn { .. } => "burn",
            Call::Transfer { .. } => "transfer",
        }
    }

    fn commit(&self, hasher: &mut Sha256) {
        let mut amount_bytes = [0u8; 32];
        match self {
            Call::Deploy {
                name,
                symbol,
                decimals,
            } => {
                hasher.update(b"deploy");
                hasher.update((name.len() as u64).to_le_bytes());
                hasher.update(name.as_bytes());
                hasher.update((symbol.len() as u64).to_le_bytes());
                hasher.update(symbol.as_bytes());
                hasher.update([*decimals]);
            }
            Call::Mint { to: party, amount }
            | Call::Burn {
                from: party,
                amount,
            }
            | Call::Transfer { to: party, amount } => {
                hasher.update(self.name().as_bytes());
                hasher.update(party.as_bytes());
                amount.to_big_endian(&mut amount_bytes);
                hasher.update(amount_bytes);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match transaction")]
    InvalidSignature,
}

/// A call signed by its sender. The sender identity is derived from the
/// public key, never taken from the payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub call: Call,
    pub contract: Option<Address>,
    pub nonce: u64,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn sign(key: &SigningKey, call: Call, contract: Option<Address>, nonce: u64) -> Self {
        let digest = payload_digest(&call, contract.as_ref(), nonce);
        let signature = key.sign(&digest);
        Self {
            call,
            contract,
            nonce,
            public_key: key.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        payload_digest(&self.call, self.contract.as_ref(), self.nonce)
    }

    /// Transaction hash: SHA-256 over the payload digest and the signature.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.digest());
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash()))
    }

    /// Check the signature and return the sender address.
    pub fn verify(&self) -> Result<Address, TxError> {
        let pk_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| TxError::MalformedPublicKey)?;
        let key = VerifyingKey::from_bytes(&pk_bytes).map_err(|_| TxError::MalformedPublicKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| TxError::MalformedSignature)?;
        key.verify_strict(&self.digest(), &signature)
            .map_err(|_| TxError::InvalidSignature)?;
        Ok(Address::from_public_key(&pk_bytes))
    }
}

/// Address an account's signing key maps to.
pub fn signer_address(key: &SigningKey) -> Address {
    Address::from_public_key(key.verifying_key().as_bytes())
}

fn payload_digest(call: &Call, contract: Option<&Address>, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"erc20-tx-v1");
    match contract {
        Some(address) => {
            hasher.update([1u8]);
            hasher.update(address.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update(nonce.to_le_bytes());
    call.commit(&mut hasher);
    hasher.finalize().into()
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
