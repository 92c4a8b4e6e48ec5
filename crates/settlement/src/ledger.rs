//! The balance store the engine settles against.

use {
    primitive_types::{H160, U256},
    std::{collections::HashMap, sync::Mutex},
    thiserror::Error,
};

/// Why a balance transfer was refused.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(
        "insufficient balance of token {token:?}: account {from:?} holds {balance}, \
         transfer needs {amount}"
    )]
    InsufficientBalance {
        token: H160,
        from: H160,
        balance: U256,
        amount: U256,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Account balances, held externally to the engine.
///
/// Implementations provide their own mutual exclusion on balance mutations;
/// a transfer is a single blocking call that either fully succeeds or fully
/// fails.
#[mockall::automock]
pub trait Ledger: Send + Sync {
    fn balance_of(&self, account: H160, token: H160) -> U256;

    fn transfer(&self, token: H160, from: H160, to: H160, amount: U256)
        -> Result<(), TransferError>;
}

/// In-process ledger for tests and embedders without an external store.
#[derive(Debug, Default)]
pub struct InMemoryLedger(Mutex<HashMap<(H160, H160), U256>>);

impl InMemoryLedger {
    pub fn mint(&self, account: H160, token: H160, amount: U256) {
        *self
            .0
            .lock()
            .unwrap()
            .entry((account, token))
            .or_default() += amount;
    }
}

impl Ledger for InMemoryLedger {
    fn balance_of(&self, account: H160, token: H160) -> U256 {
        self.0
            .lock()
            .unwrap()
            .get(&(account, token))
            .copied()
            .unwrap_or_default()
    }

    fn transfer(
        &self,
        token: H160,
        from: H160,
        to: H160,
        amount: U256,
    ) -> Result<(), TransferError> {
        let mut balances = self.0.lock().unwrap();
        let balance = balances.get(&(from, token)).copied().unwrap_or_default();
        if balance < amount {
            return Err(TransferError::InsufficientBalance {
                token,
                from,
                balance,
                amount,
            });
        }
        *balances.entry((from, token)).or_default() = balance - amount;
        *balances.entry((to, token)).or_default() += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_the_amount() {
        let ledger = InMemoryLedger::default();
        let token = H160::from_low_u64_be(10);
        let from = H160::from_low_u64_be(1);
        let to = H160::from_low_u64_be(2);

        ledger.mint(from, token, 5.into());
        ledger.transfer(token, from, to, 3.into()).unwrap();
        assert_eq!(ledger.balance_of(from, token), 2.into());
        assert_eq!(ledger.balance_of(to, token), 3.into());
    }

    #[test]
    fn transfer_fails_on_insufficient_balance() {
        let ledger = InMemoryLedger::default();
        let token = H160::from_low_u64_be(10);
        let from = H160::from_low_u64_be(1);
        let to = H160::from_low_u64_be(2);

        ledger.mint(from, token, 2.into());
        let err = ledger.transfer(token, from, to, 3.into()).unwrap_err();
        assert!(matches!(
            err,
            TransferError::InsufficientBalance { balance, amount, .. }
                if balance == 2.into() && amount == 3.into()
        ));
        // Nothing moved.
        assert_eq!(ledger.balance_of(from, token), 2.into());
        assert_eq!(ledger.balance_of(to, token), U256::zero());
    }

    #[test]
    fn self_transfer_is_a_no_op() {
        let ledger = InMemoryLedger::default();
        let token = H160::from_low_u64_be(10);
        let account = H160::from_low_u64_be(1);

        ledger.mint(account, token, 5.into());
        ledger.transfer(token, account, account, 5.into()).unwrap();
        assert_eq!(ledger.balance_of(account, token), 5.into());
    }
}
