//! The `abipago://pay` invoice payload carried by QR codes and NFC tags.
//!
//! Wire shape:
//!
//! ```text
//! abipago://pay?ens=<name>&amount=<decimal>&ref=<str>&asset=<sym>&chainId=<int>
//!   &token=<addr>&decimals=<int>&router=<addr>&receiver=<addr>
//! ```
//!
//! `ens` and `amount` are mandatory; everything else may come from the QR or
//! be filled in later from the merchant's resolved profile (QR fields win on
//! conflict). A payload that is not an AbiPago URI — wrong scheme, missing
//! required field, unparseable amount — is simply not a payment request:
//! parsing returns `None` rather than a typed error so scanners can ignore
//! foreign QR content silently.

use alloy_primitives::Address;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::amount::MoneyAmount;
use crate::chain::ChainRef;

const SCHEME: &str = "abipago";
const HOST: &str = "pay";

/// A parsed `abipago://pay` payment request.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequestUri {
    /// Merchant name in the external naming system.
    pub ens: String,
    /// Display amount in the merchant's token, e.g. `"3.50"`.
    pub amount: String,
    /// Human-readable reference; hashed into the invoice `reference` field.
    pub reference: Option<String>,
    /// Token symbol hint for display.
    pub asset: Option<String>,
    /// Settlement chain override.
    pub chain_id: Option<ChainRef>,
    /// Requested token address override.
    pub token: Option<Address>,
    /// Token decimals override for amount scaling.
    pub decimals: Option<u8>,
    /// Settlement router override.
    pub router: Option<Address>,
    /// Destination wallet override.
    pub receiver: Option<Address>,
}

impl PaymentRequestUri {
    pub fn new(ens: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            ens: ens.into(),
            amount: amount.into(),
            reference: None,
            asset: None,
            chain_id: None,
            token: None,
            decimals: None,
            router: None,
            receiver: None,
        }
    }

    /// Parses a scanned payload. Returns `None` for anything that is not a
    /// well-formed AbiPago payment request.
    ///
    /// Malformed *optional* fields degrade silently to absent, mirroring how
    /// the profile resolver treats unparseable text records.
    pub fn parse(input: &str) -> Option<Self> {
        let url = Url::parse(input).ok()?;
        if url.scheme() != SCHEME || url.host_str() != Some(HOST) {
            return None;
        }

        let mut ens = None;
        let mut amount = None;
        let mut uri = PaymentRequestUri::new("", "");
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "ens" => ens = Some(value.into_owned()),
                "amount" => amount = Some(value.into_owned()),
                "ref" => uri.reference = Some(value.into_owned()),
                "asset" => uri.asset = Some(value.into_owned()),
                "chainId" => uri.chain_id = value.parse().ok(),
                "token" => uri.token = Address::from_str(&value).ok(),
                "decimals" => uri.decimals = value.parse().ok(),
                "router" => uri.router = Address::from_str(&value).ok(),
                "receiver" => uri.receiver = Address::from_str(&value).ok(),
                _ => {}
            }
        }

        let ens = ens.filter(|name| !name.is_empty())?;
        let amount = amount?;
        MoneyAmount::parse(&amount).ok()?;

        uri.ens = ens;
        uri.amount = amount;
        Some(uri)
    }
}

// "abipago://pay?ens=...&amount=...&..."
impl fmt::Display for PaymentRequestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("ens", &self.ens);
        query.append_pair("amount", &self.amount);
        if let Some(reference) = &self.reference {
            query.append_pair("ref", reference);
        }
        if let Some(asset) = &self.asset {
            query.append_pair("asset", asset);
        }
        if let Some(chain_id) = &self.chain_id {
            query.append_pair("chainId", &chain_id.to_string());
        }
        if let Some(token) = &self.token {
            query.append_pair("token", &token.to_string());
        }
        if let Some(decimals) = &self.decimals {
            query.append_pair("decimals", &decimals.to_string());
        }
        if let Some(router) = &self.router {
            query.append_pair("router", &router.to_string());
        }
        if let Some(receiver) = &self.receiver {
            query.append_pair("receiver", &receiver.to_string());
        }
        write!(f, "{SCHEME}://{HOST}?{}", query.finish())
    }
}
