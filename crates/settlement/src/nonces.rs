//! Replay protection for spend authorizations.

use {
    primitive_types::{H160, U256},
    std::{collections::HashMap, sync::Mutex},
    thiserror::Error,
};

/// A spend authorization carried a nonce that is not the owner's current one,
/// so it is either a replay or stale.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("nonce mismatch for owner {owner:?} and token {token:?}: stored {stored}, supplied {supplied}")]
pub struct NonceMismatch {
    pub owner: H160,
    pub token: H160,
    pub stored: U256,
    pub supplied: U256,
}

/// Per (owner, token) monotonic counters, strictly increasing and gapless.
///
/// Consuming a permit advances the owner's counter, so the same signature can
/// never authorize a second spend. Not a process-wide singleton: every engine
/// owns its registry and tests inject isolated ones.
#[derive(Debug, Default)]
pub struct Nonces(Mutex<HashMap<(H160, H160), U256>>);

impl Nonces {
    /// The nonce the next permit of `owner` for `token` must carry.
    pub fn current(&self, owner: H160, token: H160) -> U256 {
        self.0
            .lock()
            .unwrap()
            .get(&(owner, token))
            .copied()
            .unwrap_or_default()
    }

    /// Compare and increment: succeeds only if the stored value equals
    /// `expected`, otherwise fails without side effects.
    ///
    /// Two concurrent calls with the same `expected` race safely; exactly one
    /// succeeds and the other observes the incremented counter.
    pub fn advance(&self, owner: H160, token: H160, expected: U256) -> Result<(), NonceMismatch> {
        let mut nonces = self.0.lock().unwrap();
        let stored = nonces.entry((owner, token)).or_default();
        if *stored != expected {
            return Err(NonceMismatch {
                owner,
                token,
                stored: *stored,
                supplied: expected,
            });
        }
        *stored += U256::one();
        Ok(())
    }

    /// Undoes an `advance` while unwinding a failed settlement. Only steps
    /// the counter back if it still sits one past `expected`.
    pub(crate) fn retract(&self, owner: H160, token: H160, expected: U256) {
        let mut nonces = self.0.lock().unwrap();
        if let Some(stored) = nonces.get_mut(&(owner, token)) {
            if *stored == expected + U256::one() {
                *stored = expected;
            }
        }
    }
}
