//! Rails, payment methods, and the ordered method catalog.
//!
//! A [`Rail`] is an integration family (one adapter each). A
//! [`PaymentMethod`] is what the caller picks; several methods can share a
//! rail and a method may be offered on more than one network.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::RailError;

/// One payment-integration family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    /// On-chain Bitcoin to HD-derived addresses.
    Bitcoin,
    /// Greenfield payment gateway (Lightning, Liquid).
    Gateway,
    /// USDT transfers to a fixed merchant address.
    Token,
    /// Stablecoin payment processor with IPN callbacks.
    Processor,
    /// Hosted fiat checkout.
    Checkout,
}

impl Rail {
    /// All rails, in catalog order.
    pub const ALL: [Self; 5] = [
        Self::Bitcoin,
        Self::Gateway,
        Self::Token,
        Self::Processor,
        Self::Checkout,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Gateway => "gateway",
            Self::Token => "token",
            Self::Processor => "processor",
            Self::Checkout => "checkout",
        }
    }
}

impl Display for Rail {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rail {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rail| rail.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RailError::InvalidRequest(format!("unknown rail: {s}")))
    }
}

/// What the caller asks to pay with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// On-chain bitcoin.
    Bitcoin,
    /// Lightning invoice via the gateway.
    Lightning,
    /// Liquid L-BTC via the gateway.
    Liquid,
    /// USDT sent directly to the merchant address.
    Usdt,
    /// Any stablecoin the processor supports.
    Stablecoin,
    /// Card payment through the hosted checkout.
    Card,
}

impl PaymentMethod {
    const ALL: [Self; 6] = [
        Self::Bitcoin,
        Self::Lightning,
        Self::Liquid,
        Self::Usdt,
        Self::Stablecoin,
        Self::Card,
    ];

    /// The rail that serves this method.
    #[must_use]
    pub const fn rail(self) -> Rail {
        match self {
            Self::Bitcoin => Rail::Bitcoin,
            Self::Lightning | Self::Liquid => Rail::Gateway,
            Self::Usdt => Rail::Token,
            Self::Stablecoin => Rail::Processor,
            Self::Card => Rail::Checkout,
        }
    }

    /// Network used when the caller does not name one.
    #[must_use]
    pub const fn default_network(self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Lightning => "lightning",
            Self::Liquid => "liquid",
            Self::Usdt => "trc20",
            Self::Stablecoin => "usdttrc20",
            Self::Card => "card",
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Lightning => "lightning",
            Self::Liquid => "liquid",
            Self::Usdt => "usdt",
            Self::Stablecoin => "stablecoin",
            Self::Card => "card",
        }
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| RailError::UnknownMethod(wanted.to_owned()))
    }
}

/// One entry of the method catalog shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Method the caller passes back on `create_payment`.
    pub method: PaymentMethod,
    /// Network the caller passes back on `create_payment`.
    pub network: &'static str,
    /// Rail serving the method.
    pub rail: Rail,
    /// Human-readable label.
    pub label: &'static str,
}

/// The static, ordered catalog of everything this service can offer.
///
/// The router filters it down to what is actually configured.
pub const METHOD_CATALOG: &[MethodDescriptor] = &[
    MethodDescriptor {
        method: PaymentMethod::Bitcoin,
        network: "bitcoin",
        rail: Rail::Bitcoin,
        label: "Bitcoin (on-chain)",
    },
    MethodDescriptor {
        method: PaymentMethod::Lightning,
        network: "lightning",
        rail: Rail::Gateway,
        label: "Bitcoin Lightning",
    },
    MethodDescriptor {
        method: PaymentMethod::Liquid,
        network: "liquid",
        rail: Rail::Gateway,
        label: "Liquid Bitcoin",
    },
    MethodDescriptor {
        method: PaymentMethod::Usdt,
        network: "trc20",
        rail: Rail::Token,
        label: "USDT (TRC20)",
    },
    MethodDescriptor {
        method: PaymentMethod::Usdt,
        network: "erc20",
        rail: Rail::Token,
        label: "USDT (ERC20)",
    },
    MethodDescriptor {
        method: PaymentMethod::Stablecoin,
        network: "usdttrc20",
        rail: Rail::Processor,
        label: "Stablecoins",
    },
    MethodDescriptor {
        method: PaymentMethod::Card,
        network: "card",
        rail: Rail::Checkout,
        label: "Card",
    },
];
