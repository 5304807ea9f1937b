//! Cost and iteration accounting for one turn.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use agent_provider::Usage;

/// Upper bound applied when the iteration cap is configured as unlimited.
pub const UNLIMITED_ITERATION_BOUND: u32 = 10_000;

const PICODOLLARS_PER_DOLLAR: f64 = 1e12;
const MICRODOLLARS_PER_DOLLAR: f64 = 1e6;

/// An exact amount of money in picodollars.
///
/// One token at a price of one micro-dollar per million tokens is exactly one
/// picodollar, so token costs accumulate without rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(u128);

impl Cost {
    pub const ZERO: Self = Self(0);

    /// Converts a dollar amount, rounding to the nearest picodollar. Negative
    /// and non-finite inputs become zero.
    pub fn from_dollars(dollars: f64) -> Self {
        if !dollars.is_finite() || dollars <= 0.0 {
            return Self::ZERO;
        }
        Self((dollars * PICODOLLARS_PER_DOLLAR).round() as u128)
    }

    pub const fn picodollars(self) -> u128 {
        self.0
    }

    pub fn dollars(self) -> f64 {
        self.0 as f64 / PICODOLLARS_PER_DOLLAR
    }
}

impl Add for Cost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.dollars())
    }
}

/// Per-model token prices in dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const FREE: Self = Self::new(0.0, 0.0);

    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Exact cost of one call.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Cost {
        let input = u128::from(input_tokens) * microdollars(self.input_per_million);
        let output = u128::from(output_tokens) * microdollars(self.output_per_million);
        Cost(input.saturating_add(output))
    }
}

fn microdollars(dollars: f64) -> u128 {
    if !dollars.is_finite() || dollars <= 0.0 {
        return 0;
    }
    (dollars * MICRODOLLARS_PER_DOLLAR).round() as u128
}

/// Adds one iteration's token cost to `cumulative` and returns the new total.
pub fn add_iteration_cost(
    cumulative: Cost,
    input_tokens: u64,
    output_tokens: u64,
    price: ModelPrice,
) -> Cost {
    cumulative + price.cost(input_tokens, output_tokens)
}

/// True when a positive ceiling is strictly exceeded. Zero means unlimited.
pub fn exceeds_ceiling(cost: Cost, ceiling_dollars: f64) -> bool {
    ceiling_dollars > 0.0 && cost > Cost::from_dollars(ceiling_dollars)
}

pub fn effective_iteration_cap(cap: u32) -> u32 {
    if cap == 0 {
        UNLIMITED_ITERATION_BOUND
    } else {
        cap.min(UNLIMITED_ITERATION_BOUND)
    }
}

/// True once `count` iterations have used up the cap. Zero means unlimited,
/// bounded internally.
pub fn exceeds_iteration_cap(count: u32, cap: u32) -> bool {
    count >= effective_iteration_cap(cap)
}

/// Running totals for the turn currently being driven.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetGuard {
    ceiling_dollars: f64,
    iteration_cap: u32,
    cost: Cost,
    iterations: u32,
    usage: Usage,
}

impl BudgetGuard {
    pub fn new(ceiling_dollars: f64, iteration_cap: u32) -> Self {
        Self {
            ceiling_dollars,
            iteration_cap,
            cost: Cost::ZERO,
            iterations: 0,
            usage: Usage::default(),
        }
    }

    /// Records a completed provider call and returns the cumulative cost.
    pub fn record_iteration(&mut self, usage: Usage, price: ModelPrice) -> Cost {
        self.iterations = self.iterations.saturating_add(1);
        self.usage.input_tokens = self.usage.input_tokens.saturating_add(usage.input_tokens);
        self.usage.output_tokens = self.usage.output_tokens.saturating_add(usage.output_tokens);
        self.cost = add_iteration_cost(self.cost, usage.input_tokens, usage.output_tokens, price);
        self.cost
    }

    pub fn ceiling_exceeded(&self) -> bool {
        exceeds_ceiling(self.cost, self.ceiling_dollars)
    }

    pub fn iteration_cap_reached(&self) -> bool {
        exceeds_iteration_cap(self.iterations, self.iteration_cap)
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn ceiling_dollars(&self) -> f64 {
        self.ceiling_dollars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONNET: ModelPrice = ModelPrice::new(3.0, 15.0);

    #[test]
    fn accumulation_is_associative() {
        let stepwise = [(100, 50), (150, 75)]
            .into_iter()
            .fold(Cost::ZERO, |total, (input, output)| {
                add_iteration_cost(total, input, output, SONNET)
            });
        let combined = add_iteration_cost(Cost::ZERO, 250, 125, SONNET);

        assert_eq!(stepwise, combined);
        assert_eq!(combined.picodollars(), 250 * 3_000_000 + 125 * 15_000_000);
    }

    #[test]
    fn fractional_prices_stay_exact() {
        let haiku = ModelPrice::new(0.25, 1.25);
        let parts: Cost = (0..1000).map(|_| haiku.cost(1, 1)).sum();
        assert_eq!(parts, haiku.cost(1000, 1000));
        assert_eq!(parts.picodollars(), 1_500_000_000);
    }

    #[test]
    fn zero_ceiling_is_unlimited() {
        let huge = Cost::from_dollars(1_000_000.0);
        assert!(!exceeds_ceiling(huge, 0.0));
        assert!(!exceeds_ceiling(Cost::from_dollars(1.0), 1.0));
        assert!(exceeds_ceiling(Cost::from_dollars(1.000001), 1.0));
    }

    #[test]
    fn iteration_cap_is_reached_at_the_cap() {
        assert!(!exceeds_iteration_cap(2, 3));
        assert!(exceeds_iteration_cap(3, 3));
        assert!(!exceeds_iteration_cap(9_999, 0));
        assert!(exceeds_iteration_cap(UNLIMITED_ITERATION_BOUND, 0));
    }

    #[test]
    fn guard_tracks_usage_cost_and_iterations() {
        let mut guard = BudgetGuard::new(0.001, 0);
        guard.record_iteration(
            Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
            SONNET,
        );
        assert_eq!(guard.iterations(), 1);
        assert!(!guard.ceiling_exceeded());

        let total = guard.record_iteration(
            Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
            SONNET,
        );
        assert_eq!(total, Cost::from_dollars(0.0012));
        assert!(guard.ceiling_exceeded());
        assert_eq!(guard.usage().input_tokens, 200);
    }

    #[test]
    fn display_uses_dollars() {
        assert_eq!(Cost::from_dollars(0.0012).to_string(), "$0.001200");
    }
}
