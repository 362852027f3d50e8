//! Broker error code classification.
//!
//! Broker notices share one error callback regardless of whether they are
//! failures, connectivity changes, or informational chatter. The class
//! decides which part of the session reacts.

use serde::{Deserialize, Serialize};

/// How the session reacts to a broker error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Informational farm-status notices; suppressed.
    Benign,
    /// Connectivity to the broker was lost.
    Disconnect,
    /// Connectivity to the broker was restored.
    Reconnect,
    /// Warning range; logged only.
    Warning,
    /// Refers to an order; the order is terminated with the message.
    OrderRelated,
    /// Refers to a market data subscription.
    TickerRelated,
    /// Refers to a contract resolution request.
    ContractRequest,
    /// Anything else; logged as an error.
    Other,
}

impl ErrorClass {
    /// Label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::Warning => "warning",
            Self::OrderRelated => "order",
            Self::TickerRelated => "ticker",
            Self::ContractRequest => "contract_request",
            Self::Other => "other",
        }
    }
}

/// Classify a broker error code.
///
/// Membership is by explicit code list. The order family has gaps (108,
/// 162, 165, ...) whose id is a request id rather than an order id.
#[must_use]
pub const fn classify(code: i32) -> ErrorClass {
    if is_benign(code) {
        ErrorClass::Benign
    } else if is_disconnect(code) {
        ErrorClass::Disconnect
    } else if is_reconnect(code) {
        ErrorClass::Reconnect
    } else if is_warning(code) {
        ErrorClass::Warning
    } else if is_ticker_related(code) {
        ErrorClass::TickerRelated
    } else if is_order_related(code) {
        ErrorClass::OrderRelated
    } else if is_contract_request(code) {
        ErrorClass::ContractRequest
    } else {
        ErrorClass::Other
    }
}

const fn is_benign(code: i32) -> bool {
    matches!(code, 2104 | 2106 | 2137)
}

const fn is_disconnect(code: i32) -> bool {
    matches!(code, 502 | 504 | 1100 | 1300 | 2110)
}

const fn is_reconnect(code: i32) -> bool {
    matches!(code, 1101 | 1102)
}

const fn is_warning(code: i32) -> bool {
    matches!(code, 2100..=2199)
}

const fn is_ticker_related(code: i32) -> bool {
    matches!(
        code,
        101 | 102
            | 138
            | 300..=302
            | 309
            | 310
            | 316
            | 317
            | 321
            | 322
            | 354
            | 365
            | 366
            | 385
            | 386
            | 420
            | 510
            | 511
            | 519
            | 520
            | 524
            | 525
            | 529
            | 530
    )
}

const fn is_order_related(code: i32) -> bool {
    matches!(
        code,
        103..=107
            | 109..=111
            | 113..=126
            | 129
            | 131..=137
            | 140
            | 141
            | 144
            | 146..=148
            | 151..=161
            | 163
            | 164
            | 166..=168
            | 201..=203
            | 303
            | 311..=315
            | 325
            | 327..=329
            | 335..=343
            | 347..=353
            | 355
            | 356
            | 358..=364
            | 367..=380
            | 382
            | 383
            | 387..=419
            | 422..=429
            | 433..=437
            | 512
            | 515..=517
            | 10003
            | 10005..=10014
            | 10016..=10027
    )
}

const fn is_contract_request(code: i32) -> bool {
    matches!(code, 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(2104, ErrorClass::Benign ; "market data farm ok")]
    #[test_case(2106, ErrorClass::Benign ; "hmds farm ok")]
    #[test_case(2137, ErrorClass::Benign ; "cross side warning")]
    #[test_case(1100, ErrorClass::Disconnect ; "connectivity lost")]
    #[test_case(504, ErrorClass::Disconnect ; "not connected")]
    #[test_case(2110, ErrorClass::Disconnect ; "tws to server broken")]
    #[test_case(1101, ErrorClass::Reconnect ; "restored data lost")]
    #[test_case(1102, ErrorClass::Reconnect ; "restored data kept")]
    #[test_case(2103, ErrorClass::Warning ; "farm broken")]
    #[test_case(2199, ErrorClass::Warning ; "warning upper bound")]
    #[test_case(201, ErrorClass::OrderRelated ; "order rejected")]
    #[test_case(202, ErrorClass::OrderRelated ; "order cancelled")]
    #[test_case(10020, ErrorClass::OrderRelated ; "order range")]
    #[test_case(103, ErrorClass::OrderRelated ; "duplicate order id")]
    #[test_case(161, ErrorClass::OrderRelated ; "cancel attempted on inactive order")]
    #[test_case(168, ErrorClass::OrderRelated ; "order family upper bound")]
    #[test_case(108, ErrorClass::Other ; "gap 108")]
    #[test_case(112, ErrorClass::Other ; "gap 112")]
    #[test_case(130, ErrorClass::Other ; "gap 130")]
    #[test_case(162, ErrorClass::Other ; "historical data service error")]
    #[test_case(165, ErrorClass::Other ; "historical data service query message")]
    #[test_case(138, ErrorClass::TickerRelated ; "unparsable market data request")]
    #[test_case(354, ErrorClass::TickerRelated ; "not subscribed")]
    #[test_case(200, ErrorClass::ContractRequest ; "no security definition")]
    #[test_case(2200, ErrorClass::Other ; "past warning range")]
    #[test_case(10004, ErrorClass::Other ; "gap in order range")]
    #[test_case(-1, ErrorClass::Other ; "negative")]
    fn test_classify(code: i32, expected: ErrorClass) {
        assert_eq!(classify(code), expected);
    }

    #[test]
    fn test_class_labels_unique() {
        let classes = [
            ErrorClass::Benign,
            ErrorClass::Disconnect,
            ErrorClass::Reconnect,
            ErrorClass::Warning,
            ErrorClass::OrderRelated,
            ErrorClass::TickerRelated,
            ErrorClass::ContractRequest,
            ErrorClass::Other,
        ];
        let labels: std::collections::HashSet<_> = classes.iter().map(|c| c.as_str()).collect();
        assert_eq!(labels.len(), classes.len());
    }
}
