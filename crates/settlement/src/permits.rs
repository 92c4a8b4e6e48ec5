//! Spend authorization validation.

use {
    crate::nonces::{NonceMismatch, Nonces},
    model::{
        order::Order,
        permit::Permit,
        signature::{EcdsaSignature, RecoveryError},
        DomainSeparator,
    },
    primitive_types::{H160, U256},
    thiserror::Error,
};

/// Why a spend authorization was rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("spend authorization expired at {deadline}, settlement time is {now}")]
    Expired { deadline: u64, now: u64 },
    #[error("signature recovers to {recovered:?}, expected owner {expected:?}")]
    SignerMismatch { expected: H160, recovered: H160 },
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    Nonce(#[from] NonceMismatch),
    #[error("no signing domain configured for token {0:?}")]
    UnknownToken(H160),
    #[error("authorization names spender {actual:?}, the engine settles as {expected:?}")]
    SpenderMismatch { expected: H160, actual: H160 },
    #[error("authorization is for token {actual:?}, the order sells {expected:?}")]
    TokenMismatch { expected: H160, actual: H160 },
    #[error("authorization is from {actual:?}, the order account is {expected:?}")]
    OwnerMismatch { expected: H160, actual: H160 },
    #[error("authorized value {value} does not cover the sell amount {required}")]
    InsufficientValue { value: U256, required: U256 },
}

/// Checks that the permit covers the order it was submitted with: the
/// engine as spender, the order's sell token, the order's account as owner
/// and a value of at least the sell amount. Pure.
pub fn covers(permit: &Permit, order: &Order, spender: H160) -> Result<(), AuthError> {
    if permit.spender != spender {
        return Err(AuthError::SpenderMismatch {
            expected: spender,
            actual: permit.spender,
        });
    }
    if permit.token != order.sell_token {
        return Err(AuthError::TokenMismatch {
            expected: order.sell_token,
            actual: permit.token,
        });
    }
    if permit.owner != order.account {
        return Err(AuthError::OwnerMismatch {
            expected: order.account,
            actual: permit.owner,
        });
    }
    if permit.value < order.sell_amount {
        return Err(AuthError::InsufficientValue {
            value: permit.value,
            required: order.sell_amount,
        });
    }
    Ok(())
}

/// Verifies a signed spend permission and consumes its nonce.
///
/// The nonce advance is the final step: it only happens once every other
/// check has passed, and it is what arms the subsequent transfer. A permit
/// whose nonce is not the owner's current one fails without side effects.
pub fn validate(
    permit: &Permit,
    signature: &EcdsaSignature,
    domain: &DomainSeparator,
    now: u64,
    nonces: &Nonces,
) -> Result<(), AuthError> {
    if now > permit.deadline {
        return Err(AuthError::Expired {
            deadline: permit.deadline,
            now,
        });
    }
    let recovered = signature.recover(domain, &permit.hash_struct())?;
    if recovered != permit.owner {
        return Err(AuthError::SignerMismatch {
            expected: permit.owner,
            recovered,
        });
    }
    nonces.advance(permit.owner, permit.token, permit.nonce)?;
    Ok(())
}
