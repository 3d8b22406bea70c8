//! Message signing for Kaptain reports
//!
//! Each message is hashed with keccak256 and that hash is signed as an
//! Ethereum personal message (`"\x19Ethereum Signed Message:\n32" || hash`),
//! which is the digest the contract feeds to `ecrecover`. Signatures travel
//! as `abi.encode(bytes32 r, bytes32 s, uint8 v)`.

use ethers::abi::{self, ParamType, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, RecoveryMessage, Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};
use std::fmt;

use crate::error::{ReportError, Result};

/// Size of a raw secp256k1 secret key
pub const PRIVATE_KEY_LEN: usize = 32;

/// A message together with its hash, transport signature and recovered signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub hash: H256,
    pub message: Vec<u8>,
    /// `abi.encode(bytes32, bytes32, uint8)` of (r, s, v)
    pub signature: Vec<u8>,
    pub signatory: Address,
}

impl SignedMessage {
    pub fn message_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.message))
    }

    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }
}

/// Signs messages with a single secp256k1 key
#[derive(Clone)]
pub struct MessageSigner {
    wallet: LocalWallet,
}

impl MessageSigner {
    /// Build from a raw 32-byte secret key
    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != PRIVATE_KEY_LEN {
            return Err(ReportError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_LEN,
                key.len()
            )));
        }
        let wallet =
            LocalWallet::from_bytes(key).map_err(|e| ReportError::InvalidKey(e.to_string()))?;
        Ok(Self { wallet })
    }

    /// Build from a hex secret key, with or without `0x`
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = key.trim();
        let raw = key.strip_prefix("0x").unwrap_or(key);
        let bytes = hex::decode(raw).map_err(|e| ReportError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_wallet(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// Hash, sign and self-recover one message
    pub fn sign_message(&self, message: Vec<u8>) -> Result<SignedMessage> {
        let hash = H256::from(keccak256(&message));
        let signature = self
            .wallet
            .sign_hash(signing_digest(hash))
            .map_err(|e| ReportError::Signing(e.to_string()))?;
        let signatory = recover(hash, &signature)?;

        Ok(SignedMessage {
            hash,
            message,
            signature: encode_signature(&signature),
            signatory,
        })
    }

    /// Sign every message in order; fails as a whole on the first error
    pub fn sign<I>(&self, messages: I) -> Result<Vec<SignedMessage>>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        messages
            .into_iter()
            .map(|m| self.sign_message(m))
            .collect()
    }
}

impl fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSigner")
            .field("address", &format!("{:#x}", self.address()))
            .finish()
    }
}

/// Sign messages with a raw private key
pub fn sign<I>(messages: I, private_key: &[u8]) -> Result<Vec<SignedMessage>>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    MessageSigner::from_bytes(private_key)?.sign(messages)
}

/// Digest actually handed to ECDSA for a message hash
pub fn signing_digest(hash: H256) -> H256 {
    hash_message(hash.as_bytes())
}

/// Pack (r, s, v) as `bytes32, bytes32, uint8`
pub fn encode_signature(signature: &Signature) -> Vec<u8> {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    signature.r.to_big_endian(&mut r);
    signature.s.to_big_endian(&mut s);
    abi::encode(&[
        Token::FixedBytes(r.to_vec()),
        Token::FixedBytes(s.to_vec()),
        Token::Uint(U256::from(signature.v)),
    ])
}

/// Unpack a transport signature
pub fn decode_signature(data: &[u8]) -> Result<Signature> {
    let tokens = abi::decode(
        &[
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Uint(8),
        ],
        data,
    )?;

    match tokens.as_slice() {
        [Token::FixedBytes(r), Token::FixedBytes(s), Token::Uint(v)] => {
            if *v > U256::from(u8::MAX) {
                return Err(ReportError::Decode(format!("v = {} exceeds uint8", v)));
            }
            Ok(Signature {
                r: U256::from_big_endian(r),
                s: U256::from_big_endian(s),
                v: v.as_u64(),
            })
        }
        other => Err(ReportError::Decode(format!(
            "unexpected signature tokens {:?}",
            other
        ))),
    }
}

/// Recover the signer of a message hash
pub fn recover(hash: H256, signature: &Signature) -> Result<Address> {
    signature
        .recover(RecoveryMessage::Hash(signing_digest(hash)))
        .map_err(|e| ReportError::Decode(e.to_string()))
}

/// Recover the signer from a raw message and its transport signature,
/// the same check the contract performs before accepting a message.
pub fn recover_signatory(message: &[u8], signature: &[u8]) -> Result<Address> {
    let hash = H256::from(keccak256(message));
    recover(hash, &decode_signature(signature)?)
}
