//! Bindings of the contracts the pool creator talks to and the encoding of
//! [`Call`]s into transactions.

use {
    crate::domain::{
        call::{Call, CreatePool, PoolKind},
        eclp,
        eth,
    },
    alloy::{
        primitives::{
            Bytes,
            I256,
            aliases::{U48, U160},
        },
        sol_types::SolCall,
    },
};

alloy::sol! {
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IERC4626 {
        function mint(uint256 shares, address receiver) external returns (uint256 assets);
        function previewMint(uint256 shares) external view returns (uint256 assets);
    }

    #[sol(rpc)]
    interface IPermit2 {
        function approve(address token, address spender, uint160 amount, uint48 expiration) external;
        function allowance(address user, address token, address spender)
            external
            view
            returns (uint160 amount, uint48 expiration, uint48 nonce);
    }

    #[sol(rpc)]
    interface BCoWFactory {
        event LOG_NEW_POOL(address indexed caller, address indexed bPool);

        function newBPool(string name, string symbol) external returns (address bPool);
    }

    #[sol(rpc)]
    interface BPool {
        function bind(address token, uint256 balance, uint256 denorm) external;
        function setSwapFee(uint256 swapFee) external;
        function finalize() external;
        function isFinalized() external view returns (bool);
        function getCurrentTokens() external view returns (address[] memory tokens);
        function getSwapFee() external view returns (uint256);
    }

    struct TokenConfig {
        address token;
        uint8 tokenType;
        address rateProvider;
        bool paysYieldFees;
    }

    struct PoolRoleAccounts {
        address pauseManager;
        address swapFeeManager;
        address poolCreator;
    }

    struct EclpParams {
        int256 alpha;
        int256 beta;
        int256 c;
        int256 s;
        int256 lambda;
    }

    struct Vector2 {
        int256 x;
        int256 y;
    }

    struct DerivedEclpParams {
        Vector2 tauAlpha;
        Vector2 tauBeta;
        int256 u;
        int256 v;
        int256 w;
        int256 z;
        int256 dSq;
    }

    struct ReClammPriceParams {
        uint256 initialMinPrice;
        uint256 initialMaxPrice;
        uint256 initialTargetPrice;
        bool tokenAPriceIncludesRate;
        bool tokenBPriceIncludesRate;
    }

    interface IBasePoolFactory {
        event PoolCreated(address indexed pool);
    }

    interface WeightedPoolFactory {
        function create(
            string name,
            string symbol,
            TokenConfig[] tokens,
            uint256[] normalizedWeights,
            PoolRoleAccounts roleAccounts,
            uint256 swapFeePercentage,
            address poolHooksContract,
            bool enableDonation,
            bool disableUnbalancedLiquidity,
            bytes32 salt
        ) external returns (address pool);
    }

    interface StablePoolFactory {
        function create(
            string name,
            string symbol,
            TokenConfig[] tokens,
            uint256 amplificationParameter,
            PoolRoleAccounts roleAccounts,
            uint256 swapFeePercentage,
            address poolHooksContract,
            bool enableDonation,
            bool disableUnbalancedLiquidity,
            bytes32 salt
        ) external returns (address pool);
    }

    interface StableSurgePoolFactory {
        function create(
            string name,
            string symbol,
            TokenConfig[] tokens,
            uint256 amplificationParameter,
            PoolRoleAccounts roleAccounts,
            uint256 swapFeePercentage,
            bool enableDonation,
            bytes32 salt
        ) external returns (address pool);
    }

    interface GyroECLPPoolFactory {
        function create(
            string name,
            string symbol,
            TokenConfig[] tokens,
            EclpParams eclpParams,
            DerivedEclpParams derivedEclpParams,
            PoolRoleAccounts roleAccounts,
            uint256 swapFeePercentage,
            address poolHooksContract,
            bool enableDonation,
            bool disableUnbalancedLiquidity,
            bytes32 salt
        ) external returns (address pool);
    }

    interface ReClammPoolFactory {
        function create(
            string name,
            string symbol,
            TokenConfig[] tokens,
            PoolRoleAccounts roleAccounts,
            uint256 swapFeePercentage,
            address hookContract,
            ReClammPriceParams priceParams,
            uint256 dailyPriceShiftExponent,
            uint256 centerednessMargin,
            bytes32 salt
        ) external returns (address pool);
    }

    #[sol(rpc)]
    interface IVault {
        function isPoolInitialized(address pool) external view returns (bool);
        function getPoolTokens(address pool) external view returns (address[] memory tokens);
        function getStaticSwapFeePercentage(address pool) external view returns (uint256);
    }

    interface IRouter {
        function initialize(
            address pool,
            address[] tokens,
            uint256[] exactAmountsIn,
            uint256 minBptAmountOut,
            bool wethIsEth,
            bytes userData
        ) external payable returns (uint256 bptAmountOut);
    }

    #[sol(rpc)]
    interface IStableSurgeHook {
        function setMaxSurgeFeePercentage(address pool, uint256 newMaxSurgeSurgeFeePercentage) external;
        function setSurgeThresholdPercentage(address pool, uint256 newSurgeThresholdPercentage) external;
        function getMaxSurgeFeePercentage(address pool) external view returns (uint256);
        function getSurgeThresholdPercentage(address pool) external view returns (uint256);
    }
}

/// Balancer V3 `TokenType`.
const STANDARD: u8 = 0;
const WITH_RATE: u8 = 1;

/// A transaction ready to be simulated and signed.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Transaction {
    pub to: eth::Address,
    pub data: Bytes,
}

impl Transaction {
    fn new(to: eth::Address, call: impl SolCall) -> Self {
        Self {
            to,
            data: call.abi_encode().into(),
        }
    }
}

pub fn encode(call: &Call) -> Transaction {
    match call {
        Call::Approve {
            token,
            spender,
            amount,
        } => Transaction::new(
            *token,
            IERC20::approveCall {
                spender: *spender,
                amount: *amount,
            },
        ),
        Call::Permit2Approve {
            permit2,
            token,
            spender,
            amount,
            expiration,
        } => Transaction::new(
            *permit2,
            IPermit2::approveCall {
                token: *token,
                spender: *spender,
                amount: U160::saturating_from(*amount),
                expiration: U48::saturating_from(*expiration),
            },
        ),
        Call::MintShares {
            vault,
            shares,
            receiver,
        } => Transaction::new(
            *vault,
            IERC4626::mintCall {
                shares: *shares,
                receiver: *receiver,
            },
        ),
        Call::CreateCowAmm {
            factory,
            name,
            symbol,
        } => Transaction::new(
            *factory,
            BCoWFactory::newBPoolCall {
                name: name.clone(),
                symbol: symbol.clone(),
            },
        ),
        Call::Bind {
            pool,
            token,
            balance,
            denorm,
        } => Transaction::new(
            *pool,
            BPool::bindCall {
                token: *token,
                balance: *balance,
                denorm: *denorm,
            },
        ),
        Call::SetSwapFee { pool, fee } => {
            Transaction::new(*pool, BPool::setSwapFeeCall { swapFee: *fee })
        }
        Call::Finalize { pool } => Transaction::new(*pool, BPool::finalizeCall {}),
        Call::CreatePool { factory, pool } => Transaction {
            to: *factory,
            data: create_pool(pool),
        },
        Call::Initialize {
            router,
            pool,
            tokens,
            amounts,
        } => Transaction::new(
            *router,
            IRouter::initializeCall {
                pool: *pool,
                tokens: tokens.clone(),
                exactAmountsIn: amounts.clone(),
                minBptAmountOut: eth::U256::ZERO,
                wethIsEth: false,
                userData: Bytes::new(),
            },
        ),
        Call::SetMaxSurgeFee { hook, pool, fee } => Transaction::new(
            *hook,
            IStableSurgeHook::setMaxSurgeFeePercentageCall {
                pool: *pool,
                newMaxSurgeSurgeFeePercentage: *fee,
            },
        ),
        Call::SetSurgeThreshold {
            hook,
            pool,
            threshold,
        } => Transaction::new(
            *hook,
            IStableSurgeHook::setSurgeThresholdPercentageCall {
                pool: *pool,
                newSurgeThresholdPercentage: *threshold,
            },
        ),
    }
}

fn create_pool(pool: &CreatePool) -> Bytes {
    let tokens = pool
        .tokens
        .iter()
        .map(|token| TokenConfig {
            token: token.token,
            tokenType: if token.rate_provider.is_some() {
                WITH_RATE
            } else {
                STANDARD
            },
            rateProvider: token.rate_provider.unwrap_or_default(),
            paysYieldFees: token.rate_provider.is_some(),
        })
        .collect::<Vec<_>>();
    let roles = PoolRoleAccounts {
        pauseManager: pool.pause_manager,
        swapFeeManager: pool.swap_fee_manager,
        poolCreator: eth::Address::ZERO,
    };
    let name = pool.name.clone();
    let symbol = pool.symbol.clone();

    let data = match &pool.kind {
        PoolKind::Weighted { weights } => WeightedPoolFactory::createCall {
            name,
            symbol,
            tokens,
            normalizedWeights: weights.clone(),
            roleAccounts: roles,
            swapFeePercentage: pool.swap_fee,
            poolHooksContract: pool.pool_hooks,
            enableDonation: pool.enable_donation,
            disableUnbalancedLiquidity: pool.disable_unbalanced_liquidity,
            salt: pool.salt,
        }
        .abi_encode(),
        PoolKind::Stable { amplification } => StablePoolFactory::createCall {
            name,
            symbol,
            tokens,
            amplificationParameter: *amplification,
            roleAccounts: roles,
            swapFeePercentage: pool.swap_fee,
            poolHooksContract: pool.pool_hooks,
            enableDonation: pool.enable_donation,
            disableUnbalancedLiquidity: pool.disable_unbalanced_liquidity,
            salt: pool.salt,
        }
        .abi_encode(),
        // The factory deploys the pool with its own hook.
        PoolKind::StableSurge { amplification } => StableSurgePoolFactory::createCall {
            name,
            symbol,
            tokens,
            amplificationParameter: *amplification,
            roleAccounts: roles,
            swapFeePercentage: pool.swap_fee,
            enableDonation: pool.enable_donation,
            salt: pool.salt,
        }
        .abi_encode(),
        PoolKind::GyroEclp(params) => {
            let (eclp_params, derived) = eclp_params(params);
            GyroECLPPoolFactory::createCall {
                name,
                symbol,
                tokens,
                eclpParams: eclp_params,
                derivedEclpParams: derived,
                roleAccounts: roles,
                swapFeePercentage: pool.swap_fee,
                poolHooksContract: pool.pool_hooks,
                enableDonation: pool.enable_donation,
                disableUnbalancedLiquidity: pool.disable_unbalanced_liquidity,
                salt: pool.salt,
            }
            .abi_encode()
        }
        PoolKind::ReClamm {
            min_price,
            max_price,
            target_price,
            token_a_price_includes_rate,
            token_b_price_includes_rate,
            daily_price_shift,
            centeredness_margin,
        } => ReClammPoolFactory::createCall {
            name,
            symbol,
            tokens,
            roleAccounts: roles,
            swapFeePercentage: pool.swap_fee,
            hookContract: pool.pool_hooks,
            priceParams: ReClammPriceParams {
                initialMinPrice: *min_price,
                initialMaxPrice: *max_price,
                initialTargetPrice: *target_price,
                tokenAPriceIncludesRate: *token_a_price_includes_rate,
                tokenBPriceIncludesRate: *token_b_price_includes_rate,
            },
            dailyPriceShiftExponent: *daily_price_shift,
            centerednessMargin: *centeredness_margin,
            salt: pool.salt,
        }
        .abi_encode(),
    };
    data.into()
}

fn eclp_params(params: &eclp::FixedPointParams) -> (EclpParams, DerivedEclpParams) {
    let vector = |(x, y): (I256, I256)| Vector2 { x, y };
    (
        EclpParams {
            alpha: params.alpha,
            beta: params.beta,
            c: params.c,
            s: params.s,
            lambda: params.lambda,
        },
        DerivedEclpParams {
            tauAlpha: vector(params.tau_alpha),
            tauBeta: vector(params.tau_beta),
            u: params.u,
            v: params.v,
            w: params.w,
            z: params.z,
            dSq: params.d_sq,
        },
    )
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::call::PoolToken,
        alloy::primitives::{address, hex},
    };

    #[test]
    fn encodes_erc20_approvals() {
        let tx = encode(&Call::Approve {
            token: address!("1111111111111111111111111111111111111111"),
            spender: address!("2222222222222222222222222222222222222222"),
            amount: eth::U256::from(1),
        });
        assert_eq!(tx.to, address!("1111111111111111111111111111111111111111"));
        assert_eq!(
            tx.data,
            Bytes::from(hex!(
                "095ea7b3"
                "0000000000000000000000002222222222222222222222222222222222222222"
                "0000000000000000000000000000000000000000000000000000000000000001"
            ))
        );
    }

    #[test]
    fn encodes_bpool_calls() {
        let pool = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let tx = encode(&Call::Finalize { pool });
        assert_eq!(tx.to, pool);
        assert_eq!(tx.data, Bytes::from(BPool::finalizeCall::SELECTOR.to_vec()));

        let tx = encode(&Call::Bind {
            pool,
            token: address!("1111111111111111111111111111111111111111"),
            balance: eth::U256::from(5),
            denorm: eth::U256::from(7),
        });
        let decoded = BPool::bindCall::abi_decode(&tx.data).unwrap();
        assert_eq!(decoded.balance, eth::U256::from(5));
        assert_eq!(decoded.denorm, eth::U256::from(7));
    }

    #[test]
    fn rate_providers_mark_tokens_with_rate() {
        let data = create_pool(&CreatePool {
            name: "Pool".to_owned(),
            symbol: "P".to_owned(),
            tokens: vec![
                PoolToken {
                    token: eth::Address::repeat_byte(1),
                    rate_provider: None,
                },
                PoolToken {
                    token: eth::Address::repeat_byte(2),
                    rate_provider: Some(eth::Address::repeat_byte(3)),
                },
            ],
            pause_manager: eth::Address::ZERO,
            swap_fee_manager: eth::Address::ZERO,
            swap_fee: eth::U256::from(10).pow(eth::U256::from(15)),
            pool_hooks: eth::Address::ZERO,
            enable_donation: false,
            disable_unbalanced_liquidity: false,
            salt: eth::B256::ZERO,
            kind: PoolKind::Stable {
                amplification: eth::U256::from(200),
            },
        });
        let decoded = StablePoolFactory::createCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.tokens[0].tokenType, STANDARD);
        assert_eq!(decoded.tokens[1].tokenType, WITH_RATE);
        assert_eq!(decoded.tokens[1].rateProvider, eth::Address::repeat_byte(3));
        assert_eq!(decoded.amplificationParameter, eth::U256::from(200));
    }

    #[test]
    fn permit2_amounts_saturate() {
        let tx = encode(&Call::Permit2Approve {
            permit2: eth::Address::repeat_byte(1),
            token: eth::Address::repeat_byte(2),
            spender: eth::Address::repeat_byte(3),
            amount: eth::U256::MAX,
            expiration: u64::MAX,
        });
        let decoded = IPermit2::approveCall::abi_decode(&tx.data).unwrap();
        assert_eq!(decoded.amount, U160::MAX);
        assert_eq!(decoded.expiration, U48::MAX);
    }
}
