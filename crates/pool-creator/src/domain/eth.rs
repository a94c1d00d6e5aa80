//! Ethereum primitives used across the domain.

pub use alloy::primitives::{Address, B256, TxHash, U256};

/// One in 18-decimal fixed point, the unit every percentage is expressed in
/// when it is passed to a contract.
pub const ONE_18: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// A token address paired with a raw (already scaled by the token decimals)
/// amount.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

impl TokenAmount {
    pub fn new(token: Address, amount: U256) -> Self {
        Self { token, amount }
    }
}
