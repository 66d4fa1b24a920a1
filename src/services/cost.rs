//! src/services/cost.rs
//!
//! Pure storage-cost model: byte size in, monthly charge out.
//!
//! One formula platform-wide: raw backend cost plus a fixed minimum margin,
//! floored at the margin. Keeping a single formula keeps `cost_snapshot`
//! values comparable across objects written at different times.

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Converts a byte count into the monthly charge for storing it.
///
/// `calculate` is pure and monotonically non-decreasing: the raw per-GB
/// backend cost is converted to the billing currency and the minimum margin
/// is added on top, so a zero-size object costs exactly the margin.
#[derive(Clone, Copy, Debug)]
pub struct CostModel {
    /// Backend storage price per GiB-month, in backend currency.
    pub per_gb_monthly: f64,

    /// Conversion rate from backend currency to the billing currency.
    pub fx_rate: f64,

    /// Minimum monthly profit margin, in billing currency.
    pub minimum_margin: f64,
}

impl CostModel {
    pub fn new(per_gb_monthly: f64, fx_rate: f64, minimum_margin: f64) -> Self {
        Self {
            per_gb_monthly,
            fx_rate,
            minimum_margin,
        }
    }

    /// Monthly charge for `size_bytes`, rounded to cents.
    ///
    /// Sizes are unsigned by construction; callers holding an `i64` from the
    /// database clamp at zero before converting.
    pub fn calculate(&self, size_bytes: u64) -> f64 {
        let size_gb = size_bytes as f64 / BYTES_PER_GIB;
        let raw_monthly = size_gb * self.per_gb_monthly * self.fx_rate;
        round_cents((raw_monthly + self.minimum_margin).max(self.minimum_margin))
    }
}

/// Round to two decimal places (cents).
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CostModel {
        // 0.015/GB backend price, 1.6 fx, 2.00 minimum margin.
        CostModel::new(0.015, 1.6, 2.0)
    }

    #[test]
    fn zero_size_costs_exactly_the_margin() {
        assert_eq!(model().calculate(0), 2.0);
    }

    #[test]
    fn one_gib_adds_the_converted_per_gb_cost() {
        // 2.00 + 1 * 0.015 * 1.6 = 2.024 -> 2.02 after cent rounding.
        assert_eq!(model().calculate(1 << 30), 2.02);
    }

    #[test]
    fn cost_never_drops_below_the_margin() {
        let m = model();
        for size in [0u64, 1, 512, 1 << 20, 1 << 30, 1 << 40] {
            assert!(m.calculate(size) >= m.minimum_margin);
        }
    }

    #[test]
    fn cost_is_monotone_in_size() {
        let m = model();
        let sizes = [0u64, 1, 1024, 1 << 20, 50 << 20, 1 << 30, 7 << 30, 1 << 42];
        for pair in sizes.windows(2) {
            assert!(m.calculate(pair[0]) <= m.calculate(pair[1]));
        }
    }

    #[test]
    fn cost_is_deterministic() {
        let m = model();
        assert_eq!(m.calculate(123_456_789), m.calculate(123_456_789));
    }
}
