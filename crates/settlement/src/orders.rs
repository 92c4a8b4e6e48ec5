//! Order pair validation.

use {
    model::{
        order::Order,
        signature::{EcdsaSignature, RecoveryError},
        DomainSeparator,
    },
    primitive_types::H160,
    thiserror::Error,
};

/// How the two declared amounts must relate for a pair to settle.
///
/// The engine enforces the predicate but does not originate it; venues pick
/// the rule matching their economics, and swapping it touches neither the
/// signature nor the replay logic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AmountPolicy {
    /// The limit prices of the two orders cross:
    /// `sell1 * sell2 >= buy1 * buy2`, in full 512 bit arithmetic.
    #[default]
    LimitPricesCross,
    /// Each side's declared buy amount equals the counterparty's declared
    /// sell amount.
    Exact,
}

impl AmountPolicy {
    fn compatible(&self, order1: &Order, order2: &Order) -> bool {
        match self {
            AmountPolicy::LimitPricesCross => {
                order1.sell_amount.full_mul(order2.sell_amount)
                    >= order1.buy_amount.full_mul(order2.buy_amount)
            }
            AmountPolicy::Exact => {
                order1.buy_amount == order2.sell_amount && order2.buy_amount == order1.sell_amount
            }
        }
    }
}

/// Why an order pair was rejected.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order expired at {expire_by}, settlement time is {now}")]
    Expired { expire_by: u64, now: u64 },
    #[error("signature recovers to {recovered:?}, expected account {expected:?}")]
    SignerMismatch { expected: H160, recovered: H160 },
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error("order sells and buys the same token {0:?}")]
    DegenerateTokenPair(H160),
    #[error("orders do not trade opposite sides of one token pair")]
    TokenMismatch,
    #[error("declared amounts are not compatible under {policy:?}")]
    AmountMismatch { policy: AmountPolicy },
}

/// Pure precondition check for a candidate pair; mutates nothing.
///
/// Both signatures must recover to their order's account, both orders must
/// still be live at `now`, the tokens must cross and the amounts must be
/// compatible under `policy`.
pub fn validate_pair(
    order1: &Order,
    sig1: &EcdsaSignature,
    order2: &Order,
    sig2: &EcdsaSignature,
    domain: &DomainSeparator,
    now: u64,
    policy: AmountPolicy,
) -> Result<(), OrderError> {
    for (order, signature) in [(order1, sig1), (order2, sig2)] {
        if now > order.expire_by {
            return Err(OrderError::Expired {
                expire_by: order.expire_by,
                now,
            });
        }
        let recovered = signature.recover(domain, &order.hash_struct())?;
        if recovered != order.account {
            return Err(OrderError::SignerMismatch {
                expected: order.account,
                recovered,
            });
        }
        if order.token_pair().is_none() {
            return Err(OrderError::DegenerateTokenPair(order.sell_token));
        }
    }
    if order1.sell_token != order2.buy_token || order2.sell_token != order1.buy_token {
        return Err(OrderError::TokenMismatch);
    }
    if !policy.compatible(order1, order2) {
        return Err(OrderError::AmountMismatch { policy });
    }
    Ok(())
}
