//! Instruments and contract lookups.
//!
//! A [`ContractSpec`] is what callers ask for; a [`Contract`] is what the
//! broker answers with. An [`Instrument`] wraps a resolved contract and is
//! identified solely by its broker contract id.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::InstrumentId;
use crate::error::{SessionError, SessionResult};

/// Broker security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    /// Stock or ETF.
    #[serde(rename = "STK")]
    Stock,
    /// Future.
    #[serde(rename = "FUT")]
    Future,
    /// Option.
    #[serde(rename = "OPT")]
    Option,
    /// Currency pair.
    #[serde(rename = "CASH")]
    Forex,
}

impl SecurityType {
    /// Wire code for this security type.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Stock => "STK",
            Self::Future => "FUT",
            Self::Option => "OPT",
            Self::Forex => "CASH",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SecurityType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STK" => Ok(Self::Stock),
            "FUT" => Ok(Self::Future),
            "OPT" => Ok(Self::Option),
            "CASH" => Ok(Self::Forex),
            other => Err(SessionError::InvalidArgument(format!(
                "unknown security type: {other}"
            ))),
        }
    }
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

/// Lookup parameters for contract resolution.
///
/// Unset fields are left for the broker to fill in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Broker contract id; when set, the lookup is by id alone.
    pub id: Option<InstrumentId>,
    /// Ticker symbol.
    pub symbol: String,
    /// Security type.
    pub security_type: SecurityType,
    /// Routing exchange.
    pub exchange: String,
    /// Currency.
    pub currency: String,
    /// Expiry (`YYYYMM` or `YYYYMMDD`).
    pub expiry: Option<String>,
    /// Option strike.
    pub strike: Option<Decimal>,
    /// Option right.
    pub right: Option<OptionRight>,
}

impl ContractSpec {
    /// Stock routed through SMART in USD.
    #[must_use]
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            security_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            expiry: None,
            strike: None,
            right: None,
        }
    }

    /// Future on the given exchange; leaving `expiry` unset lets the
    /// nearest contract month win.
    #[must_use]
    pub fn future(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            security_type: SecurityType::Future,
            exchange: exchange.into(),
            ..Self::stock(symbol)
        }
    }

    /// Currency pair on IDEALPRO, e.g. `forex("EUR", "USD")`.
    #[must_use]
    pub fn forex(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            security_type: SecurityType::Forex,
            exchange: "IDEALPRO".to_string(),
            currency: quote.into(),
            ..Self::stock(base)
        }
    }

    /// Lookup by broker contract id.
    #[must_use]
    pub fn by_id(id: InstrumentId) -> Self {
        Self {
            id: Some(id),
            ..Self::stock("")
        }
    }

    /// Set the expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id {
            return write!(f, "contract {id}");
        }
        write!(
            f,
            "{} {} {} {}",
            self.symbol, self.security_type, self.exchange, self.currency
        )?;
        if let Some(expiry) = &self.expiry {
            write!(f, " {expiry}")?;
        }
        Ok(())
    }
}

/// A contract as described by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Broker contract id.
    pub id: InstrumentId,
    /// Ticker symbol.
    pub symbol: String,
    /// Security type.
    pub security_type: SecurityType,
    /// Exchange.
    pub exchange: String,
    /// Currency.
    pub currency: String,
    /// Expiry for derivatives.
    pub expiry: Option<String>,
    /// Strike for options.
    pub strike: Option<Decimal>,
    /// Right for options.
    pub right: Option<OptionRight>,
    /// Contract multiplier; `None` means 1.
    pub multiplier: Option<Decimal>,
}

impl Contract {
    /// Effective multiplier (1 when unset or zero).
    #[must_use]
    pub fn multiplier(&self) -> Decimal {
        match self.multiplier {
            Some(m) if !m.is_zero() => m,
            _ => Decimal::ONE,
        }
    }
}

impl From<&Contract> for ContractSpec {
    fn from(contract: &Contract) -> Self {
        Self {
            id: Some(contract.id),
            symbol: contract.symbol.clone(),
            security_type: contract.security_type,
            exchange: contract.exchange.clone(),
            currency: contract.currency.clone(),
            expiry: contract.expiry.clone(),
            strike: contract.strike,
            right: contract.right,
        }
    }
}

/// Contract details returned by a resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetails {
    /// The contract.
    pub contract: Contract,
    /// Contract month for futures (`YYYYMM`).
    pub contract_month: Option<String>,
    /// Long descriptive name.
    pub long_name: Option<String>,
    /// Minimum price increment.
    pub min_tick: Option<Decimal>,
}

impl ContractDetails {
    /// Details carrying only a contract.
    #[must_use]
    pub const fn new(contract: Contract) -> Self {
        Self {
            contract,
            contract_month: None,
            long_name: None,
            min_tick: None,
        }
    }

    fn month_key(&self) -> Option<&str> {
        self.contract_month
            .as_deref()
            .or(self.contract.expiry.as_deref())
    }
}

/// Pick one contract out of the candidates returned for `query`.
///
/// Zero candidates is [`SessionError::NotFound`]. Several candidates are
/// accepted only when all are futures, in which case the nearest contract
/// month wins.
pub fn select_contract(
    query: &str,
    mut candidates: Vec<ContractDetails>,
) -> SessionResult<ContractDetails> {
    match candidates.len() {
        0 => Err(SessionError::NotFound {
            query: query.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        n => {
            let all_futures = candidates
                .iter()
                .all(|c| c.contract.security_type == SecurityType::Future);
            if !all_futures {
                return Err(SessionError::Ambiguous {
                    query: query.to_string(),
                    candidates: n,
                });
            }
            candidates
                .into_iter()
                .min_by(|a, b| a.month_key().cmp(&b.month_key()))
                .ok_or_else(|| SessionError::NotFound {
                    query: query.to_string(),
                })
        }
    }
}

/// A resolved, immutable instrument.
///
/// Cheap to clone; equality and hashing use the contract id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Contract", into = "Contract")]
pub struct Instrument {
    contract: Arc<Contract>,
}

impl Instrument {
    /// Wrap a resolved contract. A contract id of 0 is rejected.
    pub fn new(contract: Contract) -> SessionResult<Self> {
        if contract.id.value() == 0 {
            return Err(SessionError::InvalidArgument(format!(
                "contract {} has no id",
                contract.symbol
            )));
        }
        Ok(Self {
            contract: Arc::new(contract),
        })
    }

    /// Broker contract id.
    #[must_use]
    pub fn id(&self) -> InstrumentId {
        self.contract.id
    }

    /// Ticker symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.contract.symbol
    }

    /// Security type.
    #[must_use]
    pub fn security_type(&self) -> SecurityType {
        self.contract.security_type
    }

    /// Effective multiplier.
    #[must_use]
    pub fn multiplier(&self) -> Decimal {
        self.contract.multiplier()
    }

    /// Full contract description.
    #[must_use]
    pub fn contract(&self) -> &Contract {
        &self.contract
    }
}

impl TryFrom<Contract> for Instrument {
    type Error = SessionError;

    fn try_from(contract: Contract) -> Result<Self, Self::Error> {
        Self::new(contract)
    }
}

impl From<Instrument> for Contract {
    fn from(instrument: Instrument) -> Self {
        Arc::unwrap_or_clone(instrument.contract)
    }
}

impl PartialEq for Instrument {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Instrument {}

impl Hash for Instrument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.contract.symbol, self.contract.security_type, self.contract.id
        )
    }
}

/// Anything a caller can name an instrument by.
#[derive(Debug, Clone)]
pub enum InstrumentRef {
    /// Already resolved.
    Resolved(Instrument),
    /// Needs a lookup.
    Lookup(ContractSpec),
}

impl From<Instrument> for InstrumentRef {
    fn from(instrument: Instrument) -> Self {
        Self::Resolved(instrument)
    }
}

impl From<&Instrument> for InstrumentRef {
    fn from(instrument: &Instrument) -> Self {
        Self::Resolved(instrument.clone())
    }
}

impl From<ContractSpec> for InstrumentRef {
    fn from(spec: ContractSpec) -> Self {
        Self::Lookup(spec)
    }
}

impl From<&str> for InstrumentRef {
    fn from(symbol: &str) -> Self {
        Self::Lookup(ContractSpec::stock(symbol))
    }
}

impl From<InstrumentId> for InstrumentRef {
    fn from(id: InstrumentId) -> Self {
        Self::Lookup(ContractSpec::by_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contract(id: i64, symbol: &str, security_type: SecurityType) -> Contract {
        Contract {
            id: InstrumentId::new(id),
            symbol: symbol.to_string(),
            security_type,
            exchange: "GLOBEX".to_string(),
            currency: "USD".to_string(),
            expiry: None,
            strike: None,
            right: None,
            multiplier: None,
        }
    }

    fn future(id: i64, month: &str) -> ContractDetails {
        let mut details = ContractDetails::new(contract(id, "ES", SecurityType::Future));
        details.contract_month = Some(month.to_string());
        details
    }

    #[test]
    fn test_select_zero_candidates_is_not_found() {
        let err = select_contract("XYZ", vec![]).unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[test]
    fn test_select_single_candidate() {
        let details = ContractDetails::new(contract(1, "AAPL", SecurityType::Stock));
        let chosen = select_contract("AAPL", vec![details.clone()]).unwrap();
        assert_eq!(chosen, details);
    }

    #[test]
    fn test_select_nearest_future() {
        let candidates = vec![future(3, "202612"), future(1, "202606"), future(2, "202609")];
        let chosen = select_contract("ES", candidates).unwrap();
        assert_eq!(chosen.contract.id, InstrumentId::new(1));
    }

    #[test]
    fn test_select_mixed_candidates_is_ambiguous() {
        let candidates = vec![
            future(1, "202606"),
            ContractDetails::new(contract(2, "ES", SecurityType::Stock)),
        ];
        let err = select_contract("ES", candidates).unwrap_err();
        assert!(matches!(err, SessionError::Ambiguous { candidates: 2, .. }));
    }

    #[test]
    fn test_instrument_rejects_zero_id() {
        assert!(Instrument::new(contract(0, "AAPL", SecurityType::Stock)).is_err());
    }

    #[test]
    fn test_instrument_identity_by_id() {
        let a = Instrument::new(contract(7, "AAPL", SecurityType::Stock)).unwrap();
        let mut other = contract(7, "AAPL", SecurityType::Stock);
        other.exchange = "NASDAQ".to_string();
        let b = Instrument::new(other).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_multiplier_defaults_to_one() {
        let mut c = contract(5, "ES", SecurityType::Future);
        assert_eq!(c.multiplier(), Decimal::ONE);
        c.multiplier = Some(dec!(50));
        assert_eq!(c.multiplier(), dec!(50));
    }

    #[test]
    fn test_spec_display() {
        assert_eq!(ContractSpec::stock("AAPL").to_string(), "AAPL STK SMART USD");
        assert_eq!(
            ContractSpec::by_id(InstrumentId::new(42)).to_string(),
            "contract 42"
        );
        assert_eq!("cash".parse::<SecurityType>().unwrap(), SecurityType::Forex);
    }
}
