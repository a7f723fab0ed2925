use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places of the currency's minor unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Largest single amount accepted anywhere in the ledger: 1,000,000,000,000.00.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_232, 23_283, 0, false, MINOR_UNIT_SCALE);

/// Returns true when `amount` carries digits below the minor unit (e.g. `1.005`).
pub fn has_sub_minor_precision(amount: Decimal) -> bool {
    amount.round_dp(MINOR_UNIT_SCALE) != amount
}

/// Rescales `amount` to exactly [`MINOR_UNIT_SCALE`] decimal places.
///
/// Values with finer precision are rounded half away from zero; callers that
/// must not round should check [`has_sub_minor_precision`] first.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    let mut value =
        amount.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    value.rescale(MINOR_UNIT_SCALE);
    value
}

/// Sum of `amounts`, or `None` once the running total leaves the `Decimal` range.
pub fn checked_sum<I>(amounts: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
}

/// Whether `amount` is stored at exactly [`MINOR_UNIT_SCALE`] places.
/// `normalize_amount` cannot reach that scale for values near `Decimal::MAX`.
pub fn is_normalized(amount: Decimal) -> bool {
    amount.scale() == MINOR_UNIT_SCALE
}

/// `part / whole * 100`, rounded to the minor unit. A zero `whole` yields zero;
/// `None` when the quotient does not fit in a `Decimal`.
pub fn percent_of(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        return Some(normalize_amount(Decimal::ZERO));
    }
    part.checked_div(whole)?
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(normalize_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn normalize_pads_to_two_places() {
        let value = normalize_amount(Decimal::from(150));
        assert_eq!(value.to_string(), "150.00");
        assert_eq!(value.scale(), 2);
    }

    #[test]
    fn detects_sub_minor_precision() {
        assert!(has_sub_minor_precision(Decimal::from_str("1.005").unwrap()));
        assert!(!has_sub_minor_precision(Decimal::from_str("1.50").unwrap()));
        assert!(!has_sub_minor_precision(Decimal::from_str("1.500").unwrap()));
    }

    #[test]
    fn percent_handles_zero_whole() {
        assert_eq!(percent_of(Decimal::from(5), Decimal::ZERO), Some(Decimal::new(0, 2)));
        assert_eq!(
            percent_of(Decimal::from(250), Decimal::from(1000)).unwrap().to_string(),
            "25.00"
        );
        assert_eq!(
            percent_of(Decimal::from(1), Decimal::from(3)).unwrap().to_string(),
            "33.33"
        );
    }

    #[test]
    fn checked_sum_stops_at_overflow() {
        assert_eq!(
            checked_sum([Decimal::new(150, 2), Decimal::new(250, 2)]),
            Some(Decimal::new(400, 2))
        );
        assert_eq!(checked_sum([Decimal::MAX, Decimal::ONE]), None);
    }

    #[test]
    fn percent_overflow_is_none() {
        assert_eq!(percent_of(Decimal::MAX, Decimal::new(1, 2)), None);
    }

    #[test]
    fn max_amount_is_a_trillion() {
        assert_eq!(MAX_AMOUNT.to_string(), "1000000000000.00");
        assert!(is_normalized(normalize_amount(MAX_AMOUNT)));
    }

    #[test]
    fn huge_values_cannot_be_normalized() {
        let huge = Decimal::from_str("50000000000000000000000000000").unwrap();
        assert!(!is_normalized(normalize_amount(huge)));
    }
}
