//! Net currency exposure aggregation for emergency hedging.
//!
//! Positions are decomposed FX-style: a long EURUSD position is +notional
//! EUR and -notional USD. Currencies whose absolute net exposure exceeds a
//! configured fraction of equity are offset through the pluggable
//! `HedgeInstrumentResolver`. Non-parsable instruments are skipped; the
//! resolver seam is where other asset classes plug in.

use risk_core::traits::{HedgeInstruction, HedgeInstrumentResolver};
use risk_core::types::Position;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Split an FX symbol into (base, quote). Accepts "EURUSD", "EUR/USD",
/// "EUR_USD" and "EUR-USD"; anything else is not decomposable.
pub fn parse_currencies(instrument: &str) -> Option<(String, String)> {
    let cleaned: String = instrument
        .chars()
        .filter(|c| !matches!(c, '/' | '_' | '-'))
        .collect();
    if cleaned.len() != 6 || !cleaned.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let upper = cleaned.to_ascii_uppercase();
    Some((upper[..3].to_string(), upper[3..].to_string()))
}

/// Aggregate signed notional exposure per currency across open positions.
/// BTreeMap keeps iteration order deterministic.
pub fn net_currency_exposure(positions: &[Position]) -> BTreeMap<String, Decimal> {
    let mut net: BTreeMap<String, Decimal> = BTreeMap::new();
    for position in positions {
        let Some((base, quote)) = parse_currencies(&position.instrument) else {
            warn!(
                instrument = %position.instrument,
                "Instrument not decomposable into currencies, skipping for hedge netting"
            );
            continue;
        };
        let signed = position.signed_exposure();
        *net.entry(base).or_insert(Decimal::ZERO) += signed;
        *net.entry(quote).or_insert(Decimal::ZERO) -= signed;
    }
    net
}

/// Hedge instructions for every currency whose net exposure exceeds
/// `trigger_fraction` of equity. Each instruction is independent; placing
/// one never depends on another succeeding.
pub fn plan_hedges(
    positions: &[Position],
    equity: Decimal,
    trigger_fraction: Decimal,
    resolver: &dyn HedgeInstrumentResolver,
) -> Vec<HedgeInstruction> {
    let limit = equity * trigger_fraction;
    let mut plans = Vec::new();
    for (currency, net) in net_currency_exposure(positions) {
        if net.abs() <= limit {
            continue;
        }
        match resolver.resolve(&currency, net) {
            Some(instruction) => {
                debug!(
                    currency = %currency,
                    net = %net,
                    instrument = %instruction.instrument,
                    "Hedge planned"
                );
                plans.push(instruction);
            }
            None => {
                warn!(currency = %currency, net = %net, "No hedge instrument resolved");
            }
        }
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_core::types::Direction;

    struct MajorsResolver;

    impl HedgeInstrumentResolver for MajorsResolver {
        fn resolve(&self, currency: &str, net_exposure: Decimal) -> Option<HedgeInstruction> {
            // Offset through the USD pair for the currency.
            let instrument = match currency {
                "EUR" => "EURUSD",
                "GBP" => "GBPUSD",
                "JPY" => "USDJPY",
                _ => return None,
            };
            let direction = if net_exposure > Decimal::ZERO {
                Direction::Short
            } else {
                Direction::Long
            };
            Some(HedgeInstruction {
                instrument: instrument.to_string(),
                direction,
                size: net_exposure.abs(),
            })
        }
    }

    fn position(instrument: &str, direction: Direction, notional: i64) -> Position {
        Position::new(instrument, direction, Decimal::ONE, Decimal::new(notional, 0))
    }

    #[test]
    fn test_parse_currencies_variants() {
        assert_eq!(parse_currencies("EURUSD"), Some(("EUR".into(), "USD".into())));
        assert_eq!(parse_currencies("eur/usd"), Some(("EUR".into(), "USD".into())));
        assert_eq!(parse_currencies("GBP_JPY"), Some(("GBP".into(), "JPY".into())));
        assert_eq!(parse_currencies("XAUUSD"), Some(("XAU".into(), "USD".into())));
        assert_eq!(parse_currencies("BTC"), None);
        assert_eq!(parse_currencies("US500X7"), None);
    }

    #[test]
    fn test_netting_offsets_shared_quote_currency() {
        // Long EURUSD and short GBPUSD: USD legs offset.
        let positions = vec![
            position("EURUSD", Direction::Long, 10_000),
            position("GBPUSD", Direction::Short, 10_000),
        ];
        let net = net_currency_exposure(&positions);
        assert_eq!(net["EUR"], Decimal::new(10_000, 0));
        assert_eq!(net["GBP"], Decimal::new(-10_000, 0));
        assert_eq!(net["USD"], Decimal::ZERO);
    }

    #[test]
    fn test_netting_accumulates_same_currency() {
        // Long EURUSD + long EURJPY concentrates EUR.
        let positions = vec![
            position("EURUSD", Direction::Long, 10_000),
            position("EURJPY", Direction::Long, 5_000),
        ];
        let net = net_currency_exposure(&positions);
        assert_eq!(net["EUR"], Decimal::new(15_000, 0));
        assert_eq!(net["USD"], Decimal::new(-10_000, 0));
        assert_eq!(net["JPY"], Decimal::new(-5_000, 0));
    }

    #[test]
    fn test_plan_hedges_only_over_threshold() {
        let positions = vec![
            position("EURUSD", Direction::Long, 12_000),
            position("EURJPY", Direction::Long, 6_000),
        ];
        // Equity 20k, trigger 50%: EUR net 18k > 10k; JPY net -6k under.
        let plans = plan_hedges(
            &positions,
            Decimal::new(20_000, 0),
            Decimal::new(50, 2),
            &MajorsResolver,
        );
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].instrument, "EURUSD");
        assert_eq!(plans[0].direction, Direction::Short);
        assert_eq!(plans[0].size, Decimal::new(18_000, 0));
    }

    #[test]
    fn test_unresolvable_currency_is_skipped() {
        let positions = vec![position("AUDNZD", Direction::Long, 50_000)];
        let plans = plan_hedges(
            &positions,
            Decimal::new(10_000, 0),
            Decimal::new(50, 2),
            &MajorsResolver,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn test_unparsable_instrument_skipped_in_netting() {
        let positions = vec![position("SPX500", Direction::Long, 50_000)];
        assert!(net_currency_exposure(&positions).is_empty());
    }
}
