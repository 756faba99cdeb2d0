use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::models::{CurrencyPair, OrderRequest, OrderSide, OrderType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LadderError {
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),
    #[error("spend budget must be positive, got {0}")]
    NonPositiveBudget(Decimal),
    #[error("sell ladder needs at least one rung")]
    EmptyLadder,
    #[error("held quantity {held} is too small for {rungs} rungs at {precision} decimals")]
    RungTooSmall {
        held: Decimal,
        rungs: usize,
        precision: u32,
    },
    #[error("nothing held to sell")]
    NothingHeld,
}

/// Limit buy at `reference_price * skew` spending `budget` of the quote currency
pub fn buy_order(
    pair: &CurrencyPair,
    reference_price: Decimal,
    skew: Decimal,
    budget: Decimal,
) -> Result<OrderRequest, LadderError> {
    if budget <= Decimal::ZERO {
        return Err(LadderError::NonPositiveBudget(budget));
    }
    let price = reference_price * skew;
    if reference_price <= Decimal::ZERO || price <= Decimal::ZERO {
        return Err(LadderError::NonPositivePrice(price));
    }

    Ok(OrderRequest {
        pair: pair.clone(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        price,
        quantity: budget / price,
    })
}

/// Split `held` into limit sells at `buy_price * (1 + coefficient)`.
///
/// Every rung but the last gets `held / n` floored to `precision` decimals;
/// the last takes whatever is left, so the rungs always sum to `held`.
pub fn sell_ladder(
    pair: &CurrencyPair,
    buy_price: Decimal,
    held: Decimal,
    coefficients: &[Decimal],
    precision: u32,
) -> Result<Vec<OrderRequest>, LadderError> {
    if held <= Decimal::ZERO {
        return Err(LadderError::NothingHeld);
    }
    if coefficients.is_empty() {
        return Err(LadderError::EmptyLadder);
    }
    if buy_price <= Decimal::ZERO {
        return Err(LadderError::NonPositivePrice(buy_price));
    }

    let rungs = coefficients.len();
    let share = (held / Decimal::from(rungs))
        .round_dp_with_strategy(precision, RoundingStrategy::ToZero);
    if rungs > 1 && share <= Decimal::ZERO {
        return Err(LadderError::RungTooSmall {
            held,
            rungs,
            precision,
        });
    }

    let mut ladder = Vec::with_capacity(rungs);
    let mut allotted = Decimal::ZERO;
    for (i, coefficient) in coefficients.iter().enumerate() {
        let price = buy_price * (Decimal::ONE + *coefficient);
        if price <= Decimal::ZERO {
            return Err(LadderError::NonPositivePrice(price));
        }
        let quantity = if i + 1 == rungs { held - allotted } else { share };
        allotted += quantity;

        ladder.push(OrderRequest {
            pair: pair.clone(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            price,
            quantity,
        });
    }

    Ok(ladder)
}

/// Liquidation of the whole remaining balance; `None` when nothing is held
pub fn exit_order(
    pair: &CurrencyPair,
    current_price: Decimal,
    sell_skew: Decimal,
    held: Decimal,
    order_type: OrderType,
) -> Option<OrderRequest> {
    if held <= Decimal::ZERO {
        return None;
    }
    Some(OrderRequest {
        pair: pair.clone(),
        side: OrderSide::Sell,
        order_type,
        price: current_price * sell_skew,
        quantity: held,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn pair() -> CurrencyPair {
        CurrencyPair::new("XYZ", "USDT")
    }

    fn coefficients() -> Vec<Decimal> {
        vec![dec!(1.0), dec!(1.1), dec!(1.2)]
    }

    #[test]
    fn test_buy_order_price_and_quantity() {
        let order = buy_order(&pair(), dec!(10.0), dec!(1.05), dec!(1.2)).unwrap();
        assert_eq!(order.price, dec!(10.5));
        assert_eq!(order.quantity, dec!(1.2) / dec!(10.5));
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::Limit);
    }

    #[test]
    fn test_buy_order_rejects_non_positive_inputs() {
        assert!(matches!(
            buy_order(&pair(), dec!(0), dec!(1.05), dec!(1.2)),
            Err(LadderError::NonPositivePrice(_))
        ));
        assert!(matches!(
            buy_order(&pair(), dec!(-1), dec!(1.05), dec!(1.2)),
            Err(LadderError::NonPositivePrice(_))
        ));
        assert_eq!(
            buy_order(&pair(), dec!(10), dec!(1.05), dec!(0)),
            Err(LadderError::NonPositiveBudget(dec!(0)))
        );
    }

    #[test]
    fn test_sell_ladder_rungs() {
        let ladder = sell_ladder(&pair(), dec!(10.5), dec!(10), &coefficients(), 2).unwrap();

        let prices: Vec<_> = ladder.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![dec!(21.0), dec!(22.05), dec!(23.1)]);

        let quantities: Vec<_> = ladder.iter().map(|o| o.quantity).collect();
        assert_eq!(quantities, vec![dec!(3.33), dec!(3.33), dec!(3.34)]);
        assert!(ladder.iter().all(|o| o.side == OrderSide::Sell));
    }

    #[test]
    fn test_sell_ladder_single_rung_takes_everything() {
        let ladder = sell_ladder(&pair(), dec!(10.5), dec!(0.004), &[dec!(1.0)], 2).unwrap();
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].quantity, dec!(0.004));
    }

    #[test]
    fn test_sell_ladder_errors() {
        assert_eq!(
            sell_ladder(&pair(), dec!(10.5), dec!(0), &coefficients(), 2),
            Err(LadderError::NothingHeld)
        );
        assert_eq!(
            sell_ladder(&pair(), dec!(10.5), dec!(5), &[], 2),
            Err(LadderError::EmptyLadder)
        );
        assert!(matches!(
            sell_ladder(&pair(), dec!(10.5), dec!(0.02), &coefficients(), 2),
            Err(LadderError::RungTooSmall { rungs: 3, .. })
        ));
    }

    #[test]
    fn test_exit_order() {
        assert_eq!(
            exit_order(&pair(), dec!(20), dec!(0.95), dec!(0), OrderType::Limit),
            None
        );

        let order = exit_order(&pair(), dec!(20), dec!(0.95), dec!(3.5), OrderType::Market).unwrap();
        assert_eq!(order.price, dec!(19.00));
        assert_eq!(order.quantity, dec!(3.5));
        assert_eq!(order.order_type, OrderType::Market);
    }

    proptest! {
        #[test]
        fn prop_ladder_sums_to_held(
            units in 1i64..10_000_000_000,
            scale in 0u32..9,
            rungs in 1usize..6,
            precision in 0u32..6,
        ) {
            let held = Decimal::new(units, scale);
            let coefficients = vec![dec!(1.0); rungs];

            if let Ok(ladder) = sell_ladder(&pair(), dec!(2.5), held, &coefficients, precision) {
                let total: Decimal = ladder.iter().map(|o| o.quantity).sum();
                prop_assert_eq!(total, held);
                prop_assert_eq!(ladder.len(), rungs);

                let first = ladder[0].quantity;
                for rung in &ladder[..rungs - 1] {
                    prop_assert_eq!(rung.quantity, first);
                    prop_assert!(rung.quantity.scale() <= precision);
                }
                prop_assert!(ladder[rungs - 1].quantity > Decimal::ZERO);
            }
        }
    }
}
