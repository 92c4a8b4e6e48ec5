//! Atomic execution of a matched order pair.

use {
    crate::{
        ledger::{Ledger, TransferError},
        nonces::Nonces,
        orders::{self, AmountPolicy, OrderError},
        permits::{self, AuthError},
    },
    model::{
        order::{Order, OrderUid},
        permit::Permit,
        signature::EcdsaSignature,
        time, DomainSeparator,
    },
    primitive_types::{H160, U256},
    serde::Serialize,
    std::{collections::HashMap, sync::Arc},
    thiserror::Error,
};

/// Deployment-fixed parameters of the engine. Signatures produced against
/// other values never verify here.
#[derive(Clone, Debug)]
pub struct SettlementConfig {
    /// The domain orders are signed under.
    pub domain: DomainSeparator,
    /// The spender every permit must name: the engine's own account.
    pub spender: H160,
    /// The domain each token's permits are signed under, keyed by token.
    pub token_domains: HashMap<H160, DomainSeparator>,
    /// The amount compatibility rule for order pairs.
    pub policy: AmountPolicy,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("spend authorization rejected: {0}")]
    Auth(#[from] AuthError),
    #[error("order pair rejected: {0}")]
    Order(#[from] OrderError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// One executed leg of a settlement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedTransfer {
    #[serde(with = "model::h160_hexadecimal")]
    pub token: H160,
    #[serde(with = "model::h160_hexadecimal")]
    pub from: H160,
    #[serde(with = "model::h160_hexadecimal")]
    pub to: H160,
    #[serde(with = "model::u256_decimal")]
    pub amount: U256,
}

/// Proof of a completed settlement: the transfer log and the identities of
/// the two orders it realized.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub order_uids: [OrderUid; 2],
    pub transfers: [ExecutedTransfer; 2],
    /// Settlement time in epoch seconds; all deadline checks used this value.
    pub settled_at: u64,
}

/// The settlement engine. The single externally invocable entry point is
/// [`Settlement::exec`]; everything else is plumbing it validates with.
pub struct Settlement {
    config: SettlementConfig,
    nonces: Nonces,
    ledger: Arc<dyn Ledger>,
}

impl Settlement {
    pub fn new(config: SettlementConfig, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            config,
            nonces: Nonces::default(),
            ledger,
        }
    }

    /// The replay registry, for submitters that need the current nonce to
    /// assemble a fresh permit.
    pub fn nonces(&self) -> &Nonces {
        &self.nonces
    }

    /// Settles the pair at the current clock.
    #[allow(clippy::too_many_arguments)]
    pub fn exec(
        &self,
        order1: &Order,
        order2: &Order,
        permit1: &Permit,
        permit2: &Permit,
        sig_order1: &EcdsaSignature,
        sig_order2: &EcdsaSignature,
        sig_permit1: &EcdsaSignature,
        sig_permit2: &EcdsaSignature,
    ) -> Result<SettlementReceipt, SettlementError> {
        self.exec_at(
            time::now_in_epoch_seconds(),
            order1,
            order2,
            permit1,
            permit2,
            sig_order1,
            sig_order2,
            sig_permit1,
            sig_permit2,
        )
    }

    /// Settles the pair treating `now` as the settlement time.
    ///
    /// Every deadline check uses this single value, so there is no window in
    /// which one leg is live and the other expired. Any failure unwinds all
    /// effects performed so far; no partial settlement is ever observable.
    #[allow(clippy::too_many_arguments)]
    pub fn exec_at(
        &self,
        now: u64,
        order1: &Order,
        order2: &Order,
        permit1: &Permit,
        permit2: &Permit,
        sig_order1: &EcdsaSignature,
        sig_order2: &EcdsaSignature,
        sig_permit1: &EcdsaSignature,
        sig_permit2: &EcdsaSignature,
    ) -> Result<SettlementReceipt, SettlementError> {
        tracing::debug!(now, "settlement received");

        self.validate_permit(order1, permit1, sig_permit1, now)?;
        if let Err(err) = self.validate_permit(order2, permit2, sig_permit2, now) {
            self.nonces
                .retract(permit1.owner, permit1.token, permit1.nonce);
            return Err(err);
        }
        tracing::debug!("authorizations checked");

        if let Err(err) = orders::validate_pair(
            order1,
            sig_order1,
            order2,
            sig_order2,
            &self.config.domain,
            now,
            self.config.policy,
        ) {
            self.retract_permits(permit1, permit2);
            return Err(err.into());
        }
        tracing::debug!("orders checked");

        // Both legs move the full declared sell amounts.
        let leg1 = ExecutedTransfer {
            token: order1.sell_token,
            from: order1.account,
            to: order2.account,
            amount: order1.sell_amount,
        };
        let leg2 = ExecutedTransfer {
            token: order2.sell_token,
            from: order2.account,
            to: order1.account,
            amount: order2.sell_amount,
        };

        if let Err(err) = self
            .ledger
            .transfer(leg1.token, leg1.from, leg1.to, leg1.amount)
        {
            self.retract_permits(permit1, permit2);
            return Err(err.into());
        }
        if let Err(err) = self
            .ledger
            .transfer(leg2.token, leg2.from, leg2.to, leg2.amount)
        {
            // The counterparty just received these funds, so a law abiding
            // ledger cannot refuse to move them back.
            if let Err(refund) = self
                .ledger
                .transfer(leg1.token, leg1.to, leg1.from, leg1.amount)
            {
                tracing::error!(?refund, "ledger refused to unwind the first settlement leg");
            }
            self.retract_permits(permit1, permit2);
            return Err(err.into());
        }
        tracing::debug!("transferred");

        let receipt = SettlementReceipt {
            order_uids: [
                order1.uid(&self.config.domain),
                order2.uid(&self.config.domain),
            ],
            transfers: [leg1, leg2],
            settled_at: now,
        };
        tracing::info!(
            uid1 = %receipt.order_uids[0],
            uid2 = %receipt.order_uids[1],
            "settled"
        );
        Ok(receipt)
    }

    fn validate_permit(
        &self,
        order: &Order,
        permit: &Permit,
        signature: &EcdsaSignature,
        now: u64,
    ) -> Result<(), SettlementError> {
        permits::covers(permit, order, self.config.spender)?;
        let domain = self
            .config
            .token_domains
            .get(&permit.token)
            .ok_or(AuthError::UnknownToken(permit.token))?;
        permits::validate(permit, signature, domain, now, &self.nonces)?;
        Ok(())
    }

    /// Unwinds the nonce advances of a failed settlement, newest first so
    /// that two permits of the same owner and token step back cleanly.
    fn retract_permits(&self, permit1: &Permit, permit2: &Permit) {
        self.nonces
            .retract(permit2.owner, permit2.token, permit2.nonce);
        self.nonces
            .retract(permit1.owner, permit1.token, permit1.nonce);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::ledger::MockLedger,
        maplit::hashmap,
        model::order::{OrderBuilder, OrderKind},
        secp256k1::SecretKey,
        web3::signing::{Key, SecretKeyRef},
    };

    const CHAIN_ID: u64 = 31337;
    const NOW: u64 = 1_000;

    fn token_a() -> H160 {
        H160::from_low_u64_be(0xa)
    }

    fn token_b() -> H160 {
        H160::from_low_u64_be(0xb)
    }

    fn spender() -> H160 {
        H160::from_low_u64_be(0xbb)
    }

    fn config() -> SettlementConfig {
        SettlementConfig {
            domain: DomainSeparator::new("Exchange", "1", CHAIN_ID, spender()),
            spender: spender(),
            token_domains: hashmap! {
                token_a() => DomainSeparator::new("TokenA", "1", CHAIN_ID, token_a()),
                token_b() => DomainSeparator::new("TokenB", "1", CHAIN_ID, token_b()),
            },
            policy: AmountPolicy::default(),
        }
    }

    struct Party {
        key: SecretKey,
        account: H160,
    }

    fn party(seed: u8) -> Party {
        let key = SecretKey::from_slice(&[seed; 32]).unwrap();
        let account = SecretKeyRef::new(&key).address();
        Party { key, account }
    }

    struct Submission {
        orders: [Order; 2],
        permits: [Permit; 2],
        order_sigs: [EcdsaSignature; 2],
        permit_sigs: [EcdsaSignature; 2],
    }

    /// The sample pair: P1 sells 5 A for 10 B, P2 sells 100 B for 50 A.
    fn submission(config: &SettlementConfig) -> Submission {
        let p1 = party(1);
        let p2 = party(2);

        let (order1, sig_order1) = OrderBuilder::default()
            .with_sell_token(token_a())
            .with_sell_amount(5.into())
            .with_buy_token(token_b())
            .with_buy_amount(10.into())
            .with_expire_by(NOW)
            .with_kind(OrderKind::Sell)
            .sign_with(&config.domain, SecretKeyRef::new(&p1.key));
        let (order2, sig_order2) = OrderBuilder::default()
            .with_sell_token(token_b())
            .with_sell_amount(100.into())
            .with_buy_token(token_a())
            .with_buy_amount(50.into())
            .with_expire_by(NOW)
            .with_kind(OrderKind::Buy)
            .sign_with(&config.domain, SecretKeyRef::new(&p2.key));

        let permit1 = Permit {
            owner: p1.account,
            spender: spender(),
            token: token_a(),
            value: 5.into(),
            nonce: U256::zero(),
            deadline: NOW,
        };
        let permit2 = Permit {
            owner: p2.account,
            spender: spender(),
            token: token_b(),
            value: 100.into(),
            nonce: U256::zero(),
            deadline: NOW,
        };
        let sig_permit1 = permit1.sign(
            &config.token_domains[&token_a()],
            SecretKeyRef::new(&p1.key),
        );
        let sig_permit2 = permit2.sign(
            &config.token_domains[&token_b()],
            SecretKeyRef::new(&p2.key),
        );

        Submission {
            orders: [order1, order2],
            permits: [permit1, permit2],
            order_sigs: [sig_order1, sig_order2],
            permit_sigs: [sig_permit1, sig_permit2],
        }
    }

    fn exec(engine: &Settlement, submission: &Submission) -> Result<SettlementReceipt, SettlementError> {
        engine.exec_at(
            NOW,
            &submission.orders[0],
            &submission.orders[1],
            &submission.permits[0],
            &submission.permits[1],
            &submission.order_sigs[0],
            &submission.order_sigs[1],
            &submission.permit_sigs[0],
            &submission.permit_sigs[1],
        )
    }

    #[test]
    fn failed_second_leg_unwinds_the_first_and_the_nonces() {
        let config = config();
        let submission = submission(&config);
        let [permit1, permit2] = submission.permits;

        let mut ledger = MockLedger::new();
        let mut sequence = mockall::Sequence::new();
        ledger
            .expect_transfer()
            .times(1)
            .in_sequence(&mut sequence)
            .withf(move |token, from, to, amount| {
                (*token, *from, *to, *amount) == (token_a(), permit1.owner, permit2.owner, 5.into())
            })
            .returning(|_, _, _, _| Ok(()));
        ledger
            .expect_transfer()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _, _| Err(TransferError::Other(anyhow::anyhow!("ledger offline"))));
        // The first leg has to come back.
        ledger
            .expect_transfer()
            .times(1)
            .in_sequence(&mut sequence)
            .withf(move |token, from, to, amount| {
                (*token, *from, *to, *amount) == (token_a(), permit2.owner, permit1.owner, 5.into())
            })
            .returning(|_, _, _, _| Ok(()));

        let engine = Settlement::new(config, Arc::new(ledger));
        let err = exec(&engine, &submission).unwrap_err();
        assert!(matches!(err, SettlementError::Transfer(_)));
        assert_eq!(
            engine.nonces().current(permit1.owner, permit1.token),
            U256::zero()
        );
        assert_eq!(
            engine.nonces().current(permit2.owner, permit2.token),
            U256::zero()
        );
    }

    #[test]
    fn rejected_order_pair_unwinds_the_nonces_and_never_touches_the_ledger() {
        let config = SettlementConfig {
            policy: AmountPolicy::Exact,
            ..config()
        };
        // The sample amounts do not match exactly, so the pair is rejected
        // after both permits already consumed their nonces.
        let submission = submission(&config);
        let engine = Settlement::new(config, Arc::new(MockLedger::new()));

        let err = exec(&engine, &submission).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Order(OrderError::AmountMismatch { .. })
        ));
        for permit in &submission.permits {
            assert_eq!(engine.nonces().current(permit.owner, permit.token), U256::zero());
        }
    }

    #[test]
    fn wrong_spender_is_rejected_before_any_state_changes() {
        let config = config();
        let mut submission = submission(&config);
        submission.permits[0].spender = H160::from_low_u64_be(0xcc);
        let engine = Settlement::new(config, Arc::new(MockLedger::new()));

        let err = exec(&engine, &submission).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Auth(AuthError::SpenderMismatch { .. })
        ));
        for permit in &submission.permits {
            assert_eq!(engine.nonces().current(permit.owner, permit.token), U256::zero());
        }
    }

    #[test]
    fn unknown_token_domain_is_rejected() {
        let submission = submission(&config());
        let mut config = config();
        config.token_domains.remove(&token_b());
        let engine = Settlement::new(config, Arc::new(MockLedger::new()));

        let err = exec(&engine, &submission).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Auth(AuthError::UnknownToken(token)) if token == token_b()
        ));
        for permit in &submission.permits {
            assert_eq!(engine.nonces().current(permit.owner, permit.token), U256::zero());
        }
    }

    #[test]
    fn receipt_serializes_for_the_submitter() {
        let config = config();
        let submission = submission(&config);

        let mut ledger = MockLedger::new();
        ledger.expect_transfer().times(2).returning(|_, _, _, _| Ok(()));
        let engine = Settlement::new(config, Arc::new(ledger));

        let receipt = exec(&engine, &submission).unwrap();
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["settledAt"], NOW);
        assert_eq!(json["transfers"][0]["amount"], "5");
        assert_eq!(json["transfers"][1]["amount"], "100");
    }
}
