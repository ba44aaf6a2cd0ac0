//! Risk-based position sizing

/// How a strategy wants an order sized. The engine turns this into a base
/// quantity using the subscription's allocated capital and the entry price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Risk this fraction of allocated capital. The quantity is derived from
    /// the stop distance so a stop hit loses exactly the risked amount.
    RiskFraction(f64),
    /// Spend a fixed quote-currency amount (DCA style).
    Quote(f64),
}

/// Base-asset quantity for an order.
///
/// For `RiskFraction(r)` with stop fraction `s`:
/// `size = (capital * r) / (entry_price * s)`, so that losing the stop
/// distance costs `capital * r`. Without a stop the full notional is treated
/// as at risk, which degrades to `capital * r / entry_price`.
pub fn position_size(sizing: Sizing, capital: f64, entry_price: f64, stop_fraction: Option<f64>) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    match sizing {
        Sizing::RiskFraction(risk) => {
            let s = match stop_fraction {
                Some(s) if s > 0.0 => s,
                _ => 1.0,
            };
            (capital * risk) / (entry_price * s)
        }
        Sizing::Quote(quote) => quote / entry_price,
    }
}

/// Stop distance as a fraction of the entry price, `None` when no stop is
/// set or the stop is on the wrong side.
pub fn stop_fraction(entry_price: f64, stop_loss: Option<f64>) -> Option<f64> {
    let stop = stop_loss?;
    if entry_price <= 0.0 {
        return None;
    }
    let fraction = (entry_price - stop).abs() / entry_price;
    (fraction > 0.0).then_some(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_fraction_loses_exactly_the_risked_amount() {
        // capital C, risk R, entry P, stop fraction S: Q * P * S == C * R
        let (capital, risk, entry, stop) = (1000.0, 0.01, 100.0, 0.02);
        let q = position_size(Sizing::RiskFraction(risk), capital, entry, Some(stop));
        assert!((q * entry * stop - capital * risk).abs() < 1e-9);
    }

    #[test]
    fn risk_fraction_without_stop_risks_full_notional() {
        let q = position_size(Sizing::RiskFraction(0.1), 1000.0, 50.0, None);
        assert!((q * 50.0 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn quote_sizing_spends_the_quote_amount() {
        let q = position_size(Sizing::Quote(10.0), 1000.0, 25_000.0, None);
        assert!((q * 25_000.0 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_entry_price_sizes_zero() {
        assert_eq!(position_size(Sizing::Quote(10.0), 1000.0, 0.0, None), 0.0);
    }

    #[test]
    fn stop_fraction_from_prices() {
        assert_eq!(stop_fraction(100.0, Some(98.0)), Some(0.02));
        assert_eq!(stop_fraction(100.0, None), None);
        assert_eq!(stop_fraction(100.0, Some(100.0)), None);
    }
}
