//! Read-only subscription pricing tiers.
//!
//! Tiers are platform configuration, not user data. They are totally ordered
//! by storage limit, with price non-decreasing in that order, and every
//! non-free tier's profit margin sits inside a fixed policy range.

use serde::Serialize;
use thiserror::Error;

/// Policy bounds for per-tier profit margins, in minor units (cents).
pub const MARGIN_MIN_MINOR_UNITS: i64 = 100;
pub const MARGIN_MAX_MINOR_UNITS: i64 = 2_000;

#[derive(Debug, Error, PartialEq)]
pub enum TierConfigError {
    #[error("tier `{0}` has a negative profit margin")]
    NegativeMargin(String),
    #[error("tier `{tier}` margin {margin} outside policy range [{min}, {max}]")]
    MarginOutOfRange {
        tier: String,
        margin: i64,
        min: i64,
        max: i64,
    },
    #[error("tiers `{0}` and `{1}` are not ordered by storage limit")]
    UnorderedLimits(String, String),
    #[error("price decreases from tier `{0}` to tier `{1}`")]
    PriceRegression(String, String),
}

/// A subscription tier: monthly price plus the storage it buys.
#[derive(Serialize, Clone, Debug)]
pub struct SubscriptionPricingTier {
    /// Stable tier identifier (e.g. "free", "plus").
    pub tier_id: &'static str,

    /// Monthly price in minor units of the billing currency.
    pub price_minor_units: i64,

    /// Storage cap in bytes; `None` means unbounded.
    pub storage_limit_bytes: Option<u64>,

    /// Fixed margin baked into the tier price, in minor units.
    pub profit_margin_minor_units: i64,
}

const GIB: u64 = 1 << 30;

/// The platform's tier table, smallest storage limit first.
pub fn default_tiers() -> Vec<SubscriptionPricingTier> {
    vec![
        SubscriptionPricingTier {
            tier_id: "free",
            price_minor_units: 0,
            storage_limit_bytes: Some(5 * GIB),
            profit_margin_minor_units: 0,
        },
        SubscriptionPricingTier {
            tier_id: "plus",
            price_minor_units: 499,
            storage_limit_bytes: Some(200 * GIB),
            profit_margin_minor_units: 200,
        },
        SubscriptionPricingTier {
            tier_id: "pro",
            price_minor_units: 1_499,
            storage_limit_bytes: Some(2_048 * GIB),
            profit_margin_minor_units: 500,
        },
        SubscriptionPricingTier {
            tier_id: "unlimited",
            price_minor_units: 4_999,
            storage_limit_bytes: None,
            profit_margin_minor_units: 1_500,
        },
    ]
}

/// Validate the tier-table invariants.
///
/// Margins must be non-negative, and within the policy range for non-free
/// tiers. Tiers must be strictly ordered by storage limit (unbounded last)
/// with non-decreasing price.
pub fn validate_tiers(tiers: &[SubscriptionPricingTier]) -> Result<(), TierConfigError> {
    for tier in tiers {
        if tier.profit_margin_minor_units < 0 {
            return Err(TierConfigError::NegativeMargin(tier.tier_id.to_string()));
        }
        if tier.price_minor_units > 0
            && !(MARGIN_MIN_MINOR_UNITS..=MARGIN_MAX_MINOR_UNITS)
                .contains(&tier.profit_margin_minor_units)
        {
            return Err(TierConfigError::MarginOutOfRange {
                tier: tier.tier_id.to_string(),
                margin: tier.profit_margin_minor_units,
                min: MARGIN_MIN_MINOR_UNITS,
                max: MARGIN_MAX_MINOR_UNITS,
            });
        }
    }

    for pair in tiers.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let ordered = match (a.storage_limit_bytes, b.storage_limit_bytes) {
            (Some(x), Some(y)) => x < y,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !ordered {
            return Err(TierConfigError::UnorderedLimits(
                a.tier_id.to_string(),
                b.tier_id.to_string(),
            ));
        }
        if b.price_minor_units < a.price_minor_units {
            return Err(TierConfigError::PriceRegression(
                a.tier_id.to_string(),
                b.tier_id.to_string(),
            ));
        }
    }

    Ok(())
}

/// Smallest tier whose storage limit covers `used_bytes`.
pub fn tier_for_usage(
    tiers: &[SubscriptionPricingTier],
    used_bytes: u64,
) -> Option<&SubscriptionPricingTier> {
    tiers
        .iter()
        .find(|t| t.storage_limit_bytes.is_none_or(|limit| used_bytes <= limit))
}
