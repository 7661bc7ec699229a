use crate::domain::{Currency, KindTotals};
use crate::error::{CaisseError, CaisseResult};
use serde::Serialize;

/// Static exchange rates for the two supported directions.
///
/// Built once from configuration and passed to whoever needs to convert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateTable {
    usd_to_cdf: f64,
    cdf_to_usd: f64,
}

impl RateTable {
    pub fn new(usd_to_cdf: f64, cdf_to_usd: f64) -> CaisseResult<Self> {
        for (name, rate) in [("USD->CDF", usd_to_cdf), ("CDF->USD", cdf_to_usd)] {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(CaisseError::validation(format!(
                    "Configured {name} rate must be a positive number (got {rate})"
                )));
            }
        }
        Ok(Self {
            usd_to_cdf,
            cdf_to_usd,
        })
    }

    /// Rate in effect for `from -> to`. Converting a currency to itself is the identity.
    pub fn default_rate(&self, from: Currency, to: Currency) -> f64 {
        match (from, to) {
            (Currency::Usd, Currency::Cdf) => self.usd_to_cdf,
            (Currency::Cdf, Currency::Usd) => self.cdf_to_usd,
            _ => 1.0,
        }
    }

    /// Single grand total in `target`: the other currency is converted and added.
    pub fn fold(&self, cdf: f64, usd: f64, target: Currency) -> f64 {
        match target {
            Currency::Cdf => cdf + usd * self.usd_to_cdf,
            Currency::Usd => usd + cdf * self.cdf_to_usd,
        }
    }

    pub fn fold_balances(&self, totals: &KindTotals) -> (f64, f64) {
        let cdf = totals.balance_cdf();
        let usd = totals.balance_usd();
        (self.fold(cdf, usd, Currency::Cdf), self.fold(cdf, usd, Currency::Usd))
    }
}

/// `amount * rate`, for a finite amount and a non-negative rate.
pub fn convert(amount: f64, rate: f64) -> CaisseResult<f64> {
    if !amount.is_finite() {
        return Err(CaisseError::validation("Amount must be a finite number"));
    }
    if !rate.is_finite() || rate < 0.0 {
        return Err(CaisseError::validation(format!(
            "Rate must be a non-negative number (got {rate})"
        )));
    }
    Ok(amount * rate)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub amount: f64,
    pub from: Currency,
    pub to: Currency,
    pub converted_amount: f64,
    pub rate_used: f64,
    pub explicit_rate: bool,
}

/// Converts between USD and CDF, using `explicit_rate` verbatim when given.
pub fn convert_currency(
    rates: &RateTable,
    amount: f64,
    from: &str,
    to: &str,
    explicit_rate: Option<f64>,
) -> CaisseResult<Conversion> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CaisseError::validation(format!(
            "Amount must be greater than 0 (got {amount})"
        )));
    }
    let from: Currency = from.parse()?;
    let to: Currency = to.parse()?;

    let rate_used = match explicit_rate {
        Some(rate) if rate.is_finite() && rate > 0.0 => rate,
        Some(rate) => {
            return Err(CaisseError::validation(format!(
                "Explicit rate must be greater than 0 (got {rate})"
            )));
        }
        None => rates.default_rate(from, to),
    };

    Ok(Conversion {
        amount,
        from,
        to,
        converted_amount: convert(amount, rate_used)?,
        rate_used,
        explicit_rate: explicit_rate.is_some(),
    })
}
