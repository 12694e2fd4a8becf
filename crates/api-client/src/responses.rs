use serde::Deserialize;
use serde_json::{Map, Value};

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// The OAuth token response shared by Shopware and Google.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// A Shopware Admin API list or search result in JSON:API form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopwareList {
    #[serde(default)]
    pub data: Vec<ShopwareEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopwareEntity {
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ShopwareEntity {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }
}

/// `GET /bank-accounts`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BankAccountList {
    #[serde(default)]
    pub data: Vec<BankAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankAccount {
    #[serde(default)]
    pub id: Value,
    pub name: Option<String>,
    pub iban: Option<String>,
}

/// `GET /bank-accounts/{id}/balances?date=`
#[derive(Debug, Clone, Deserialize)]
pub struct BankBalanceResponse {
    pub data: BankBalance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankBalance {
    #[serde(default)]
    pub amount: Value,
}

/// One page of `googleAds:search`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsSearchResponse {
    #[serde(default)]
    pub results: Vec<GoogleAdsRow>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleAdsRow {
    #[serde(default)]
    pub metrics: GoogleAdsMetrics,
}

/// `costMicros` arrives as a string (int64), `conversionsValue` as a number.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsMetrics {
    #[serde(default)]
    pub cost_micros: Value,
    #[serde(default)]
    pub conversions_value: Value,
}
