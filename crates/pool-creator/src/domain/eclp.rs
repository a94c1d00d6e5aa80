//! Gyroscope E-CLP (elliptic concentrated liquidity pool) curve parameters.
//!
//! The curve is a circle stretched by `lambda` and rotated by the unit vector
//! `(c, s)`, restricted to the price range `[alpha, beta]`. The factory takes
//! the five base parameters in 18-decimal fixed point together with the
//! derived parameters in 38-decimal fixed point, which are computed here at
//! high precision.
//!
//! The liquidity profile is only used for visualisation and is computed with
//! plain floating point arithmetic.

use {
    crate::domain::{number, pool::EclpInputs},
    alloy::primitives::I256,
    bigdecimal::BigDecimal,
    num::{ToPrimitive as _, Zero as _},
    serde::Serialize,
    std::str::FromStr,
};

/// Allowed deviation of `c² + s²` from one.
const ROTATION_VECTOR_NORM_ACCURACY: &str = "0.000000000000001";
/// Upper bound of the stretching factor.
const MAX_STRETCH_FACTOR: u64 = 100_000_000;

/// Decimals of the base parameters.
pub const PARAMS_DECIMALS: u32 = 18;
/// Decimals of the derived parameters.
pub const DERIVED_DECIMALS: u32 = 38;

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum InvalidEclpParams {
    #[error("invalid E-CLP parameter {name}: {source}")]
    Number {
        name: &'static str,
        source: number::ParseNumberError,
    },
    #[error("E-CLP price bounds must satisfy 0 < alpha < beta")]
    PriceBounds,
    #[error("E-CLP rotation vector (c, s) must be a non-negative unit vector")]
    RotationVector,
    #[error("E-CLP stretching factor must be between 1 and 1e8")]
    StretchingFactor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub alpha: BigDecimal,
    pub beta: BigDecimal,
    pub c: BigDecimal,
    pub s: BigDecimal,
    pub lambda: BigDecimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vector2 {
    pub x: BigDecimal,
    pub y: BigDecimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedParams {
    pub tau_alpha: Vector2,
    pub tau_beta: Vector2,
    pub u: BigDecimal,
    pub v: BigDecimal,
    pub w: BigDecimal,
    pub z: BigDecimal,
    pub d_sq: BigDecimal,
}

/// Base and derived parameters in the fixed point encoding the factory
/// expects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedPointParams {
    pub alpha: I256,
    pub beta: I256,
    pub c: I256,
    pub s: I256,
    pub lambda: I256,
    pub tau_alpha: (I256, I256),
    pub tau_beta: (I256, I256),
    pub u: I256,
    pub v: I256,
    pub w: I256,
    pub z: I256,
    pub d_sq: I256,
}

impl Params {
    /// Parses and validates user inputs.
    pub fn parse(inputs: &EclpInputs) -> Result<Self, InvalidEclpParams> {
        let parse = |name: &'static str, value: &str| {
            number::parse_decimal(value).map_err(|source| InvalidEclpParams::Number { name, source })
        };
        let params = Self {
            alpha: parse("alpha", &inputs.alpha)?,
            beta: parse("beta", &inputs.beta)?,
            c: parse("c", &inputs.c)?,
            s: parse("s", &inputs.s)?,
            lambda: parse("lambda", &inputs.lambda)?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), InvalidEclpParams> {
        if self.alpha <= BigDecimal::zero() || self.alpha >= self.beta {
            return Err(InvalidEclpParams::PriceBounds);
        }
        if self.c < BigDecimal::zero() || self.s < BigDecimal::zero() {
            return Err(InvalidEclpParams::RotationVector);
        }
        let norm = &self.c * &self.c + &self.s * &self.s;
        let tolerance = BigDecimal::from_str(ROTATION_VECTOR_NORM_ACCURACY)
            .expect("valid decimal constant");
        if (norm - BigDecimal::from(1)).abs() > tolerance {
            return Err(InvalidEclpParams::RotationVector);
        }
        if self.lambda < BigDecimal::from(1) || self.lambda > BigDecimal::from(MAX_STRETCH_FACTOR)
        {
            return Err(InvalidEclpParams::StretchingFactor);
        }
        Ok(())
    }

    /// The price at which liquidity is most concentrated.
    pub fn peak_price(&self) -> BigDecimal {
        if self.c.is_zero() {
            return self.beta.clone();
        }
        &self.s / &self.c
    }

    /// Maps a price onto the unit circle of the untransformed curve.
    fn tau(&self, price: &BigDecimal) -> Vector2 {
        let zeta = &self.lambda * (&self.c * price - &self.s) / (&self.c + &self.s * price);
        let norm = (BigDecimal::from(1) + &zeta * &zeta)
            .sqrt()
            .expect("1 + zeta² is positive");
        Vector2 {
            x: &zeta / &norm,
            y: BigDecimal::from(1) / norm,
        }
    }

    pub fn derived(&self) -> DerivedParams {
        let tau_alpha = self.tau(&self.alpha);
        let tau_beta = self.tau(&self.beta);
        let cc = &self.c * &self.c;
        let ss = &self.s * &self.s;
        let sc = &self.s * &self.c;

        DerivedParams {
            u: &sc * (&tau_beta.x - &tau_alpha.x),
            v: &ss * &tau_beta.y + &cc * &tau_alpha.y,
            w: &sc * (&tau_beta.y - &tau_alpha.y),
            z: &cc * &tau_beta.x + &ss * &tau_alpha.x,
            d_sq: cc + ss,
            tau_alpha,
            tau_beta,
        }
    }

    pub fn to_fixed_point(&self) -> Result<FixedPointParams, InvalidEclpParams> {
        let derived = self.derived();
        let base = |name: &'static str, value: &BigDecimal| {
            number::to_signed_fixed(value, PARAMS_DECIMALS)
                .map_err(|source| InvalidEclpParams::Number { name, source })
        };
        let extended = |name: &'static str, value: &BigDecimal| {
            number::to_signed_fixed(value, DERIVED_DECIMALS)
                .map_err(|source| InvalidEclpParams::Number { name, source })
        };
        Ok(FixedPointParams {
            alpha: base("alpha", &self.alpha)?,
            beta: base("beta", &self.beta)?,
            c: base("c", &self.c)?,
            s: base("s", &self.s)?,
            lambda: base("lambda", &self.lambda)?,
            tau_alpha: (
                extended("tauAlphaX", &derived.tau_alpha.x)?,
                extended("tauAlphaY", &derived.tau_alpha.y)?,
            ),
            tau_beta: (
                extended("tauBetaX", &derived.tau_beta.x)?,
                extended("tauBetaY", &derived.tau_beta.y)?,
            ),
            u: extended("u", &derived.u)?,
            v: extended("v", &derived.v)?,
            w: extended("w", &derived.w)?,
            z: extended("z", &derived.z)?,
            d_sq: extended("dSq", &derived.d_sq)?,
        })
    }
}

/// One sample of the liquidity profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ProfilePoint {
    pub price: f64,
    /// Liquidity density relative to the densest point of the range, in
    /// `(0, 1]`.
    pub density: f64,
}

/// Samples the liquidity density `|dx/dp|` of the curve at `samples` evenly
/// spaced prices over `[alpha, beta]`. Returns no data for invalid parameters
/// or fewer than two samples.
pub fn liquidity_profile(inputs: &EclpInputs, samples: usize) -> Vec<ProfilePoint> {
    let Ok(params) = Params::parse(inputs) else {
        return Vec::new();
    };
    if samples < 2 {
        return Vec::new();
    }
    let (Some(alpha), Some(beta), Some(c), Some(s), Some(lambda)) = (
        params.alpha.to_f64(),
        params.beta.to_f64(),
        params.c.to_f64(),
        params.s.to_f64(),
        params.lambda.to_f64(),
    ) else {
        return Vec::new();
    };

    let density = |price: f64| {
        let denominator = c + s * price;
        let zeta = lambda * (c * price - s) / denominator;
        let dzeta = lambda / (denominator * denominator);
        (c * lambda - s * zeta).abs() * dzeta / (1. + zeta * zeta).powf(1.5)
    };

    let step = (beta - alpha) / (samples - 1) as f64;
    let points = (0..samples)
        .map(|i| {
            let price = if i == samples - 1 {
                beta
            } else {
                alpha + step * i as f64
            };
            (price, density(price))
        })
        .collect::<Vec<_>>();

    let max = points
        .iter()
        .map(|(_, density)| *density)
        .fold(0., f64::max);
    if !max.is_finite() || max <= 0. {
        return Vec::new();
    }

    points
        .into_iter()
        .map(|(price, density)| ProfilePoint {
            price,
            density: density / max,
        })
        .collect()
}
