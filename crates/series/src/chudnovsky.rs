//! Chudnovsky series by binary splitting.
//!
//! pi = 426880 * sqrt(10005) * Q(0, N) / T(0, N), where the term range
//! `[0, N)` is split recursively and subranges combine through
//!
//! - P(a, b) = P(a, m) * P(m, b)
//! - Q(a, b) = Q(a, m) * Q(m, b)
//! - T(a, b) = T(a, m) * Q(m, b) + P(a, m) * T(m, b)
//!
//! Everything stays in exact integers until one final truncating division.
//! Progress is counted in split-tree nodes plus one unit for the final
//! combination, since node cost grows with the size of the subrange.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::One;
use tracing::debug;

use crate::meter::ProgressMeter;
use crate::sqrt::isqrt;
use crate::{EvalError, Evaluator, ProgressFn, Result};

/// Correct digits contributed by each term, rounded down.
const DIGITS_PER_TERM: u64 = 14;

/// 640320^3 / 24
const C3_OVER_24: u64 = 10_939_058_860_032_000;
const TERM_A: u64 = 13_591_409;
const TERM_B: u64 = 545_140_134;
const SCALE_FACTOR: u32 = 426_880;
const SQRT_ARG: u32 = 10_005;

/// Evaluator tuning.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Extra decimal digits carried and discarded at the end
    pub guard_digits: u32,
    /// Extra series terms beyond `ceil(n / 14)`
    pub guard_terms: u64,
    /// Upper bound on progress callbacks per run
    pub report_steps: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            guard_digits: 10,
            guard_terms: 2,
            report_steps: 100,
        }
    }
}

/// The Chudnovsky evaluator.
#[derive(Debug, Clone, Default)]
pub struct Chudnovsky {
    config: EvaluatorConfig,
}

/// P, Q, T for one term range.
struct Split {
    p: BigInt,
    q: BigInt,
    t: BigInt,
}

impl Split {
    fn leaf(k: u64) -> Self {
        if k == 0 {
            return Self {
                p: BigInt::one(),
                q: BigInt::one(),
                t: BigInt::from(TERM_A),
            };
        }

        let k_big = BigInt::from(k);
        let p = BigInt::from(6 * k - 5) * BigInt::from(2 * k - 1) * BigInt::from(6 * k - 1);
        let q = &k_big * &k_big * &k_big * BigInt::from(C3_OVER_24);
        let mut t = &p * (BigInt::from(TERM_A) + BigInt::from(TERM_B) * &k_big);
        if k % 2 == 1 {
            t = -t;
        }
        Self { p, q, t }
    }

    fn merge(self, right: Split) -> Self {
        Self {
            t: &self.t * &right.q + &self.p * &right.t,
            p: self.p * right.p,
            q: self.q * right.q,
        }
    }
}

impl Chudnovsky {
    /// Create an evaluator with default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom tuning.
    pub fn with_config(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Series terms needed for `n` digits.
    pub fn terms(&self, n: u64) -> u64 {
        n.div_ceil(DIGITS_PER_TERM) + self.config.guard_terms.max(1)
    }

    fn split(&self, a: u64, b: u64, meter: &mut ProgressMeter<'_, '_>) -> Result<Split> {
        let split = if b - a == 1 {
            Split::leaf(a)
        } else {
            let m = a + (b - a) / 2;
            let left = self.split(a, m, meter)?;
            let right = self.split(m, b, meter)?;
            left.merge(right)
        };
        meter.tick()?;
        Ok(split)
    }

    fn combine(&self, n: u64, split: Split) -> Result<String> {
        let exponent = n
            .checked_sub(1)
            .and_then(|e| e.checked_add(u64::from(self.config.guard_digits)))
            .and_then(|e| u32::try_from(e).ok())
            .ok_or_else(|| EvalError::Arithmetic(format!("precision {} is out of range", n)))?;

        if split.t.sign() != Sign::Plus {
            return Err(EvalError::Arithmetic(
                "series sum is not positive".to_string(),
            ));
        }

        let one = BigUint::from(10u32).pow(exponent);
        let sqrt_c = BigInt::from(isqrt(&(BigUint::from(SQRT_ARG) * &one * &one)));
        let scaled = split.q * BigInt::from(SCALE_FACTOR) * sqrt_c / split.t;
        let digits = scaled / BigInt::from(BigUint::from(10u32).pow(self.config.guard_digits));

        let digits = digits.to_string();
        if digits.len() as u64 != n {
            return Err(EvalError::Arithmetic(format!(
                "expected {} digits, produced {}",
                n,
                digits.len()
            )));
        }
        Ok(digits)
    }
}

impl Evaluator for Chudnovsky {
    fn total_iterations(&self, n: u64) -> Result<u64> {
        if n == 0 {
            return Err(EvalError::InvalidPrecision { n: 0 });
        }
        // 2N - 1 split-tree nodes plus the final combination
        Ok(2 * self.terms(n))
    }

    fn evaluate(&self, n: u64, on_progress: &mut ProgressFn<'_>) -> Result<String> {
        let total = self.total_iterations(n)?;
        let terms = self.terms(n);
        debug!("Evaluating {} digits with {} terms", n, terms);

        let mut meter = ProgressMeter::new(on_progress, total, self.config.report_steps);
        let split = self.split(0, terms, &mut meter)?;
        let digits = self.combine(n, split)?;
        meter.tick()?;

        debug!("Evaluated {} digits in {:?}", n, meter.elapsed());
        Ok(digits)
    }
}

/// Compute the first `n` digits of pi with default tuning.
pub fn evaluate(n: u64, on_progress: &mut ProgressFn<'_>) -> Result<String> {
    Chudnovsky::new().evaluate(n, on_progress)
}

/// Insert the decimal point: `"31415"` becomes `"3.1415"`.
pub fn format_decimal(digits: &str) -> String {
    let mut chars = digits.chars();
    match chars.next() {
        Some(head) if !chars.as_str().is_empty() => format!("{}.{}", head, chars.as_str()),
        _ => digits.to_string(),
    }
}
