//! Recoverable secp256k1 signatures, as carried by OCR transmissions and
//! Coinbase price messages: 65 bytes, `r || s || v`.

use k256::ecdsa::{
    RecoveryId,
    Signature,
    SigningKey,
    VerifyingKey,
};

use crate::primitive::Address;

pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadLength(usize),
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("signature recovery failed")]
    Recovery(#[from] k256::ecdsa::Error),
}

/// Recovers the address that produced `signature` over the 32-byte `digest`.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignatureError::BadLength(signature.len()));
    }
    let sig = Signature::from_slice(&signature[..64])?;
    let recovery_id = RecoveryId::from_byte(signature[64])
        .ok_or(SignatureError::InvalidRecoveryId(signature[64]))?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)?;
    Ok(Address::from_verifying_key(&key))
}

/// Produces a recoverable signature over the 32-byte `digest`.
pub fn sign_recoverable(digest: &[u8; 32], key: &SigningKey) -> [u8; SIGNATURE_LEN] {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .expect("signing a 32-byte prehash cannot fail");
    let mut out = [0_u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recovery_id.to_byte();
    out
}
