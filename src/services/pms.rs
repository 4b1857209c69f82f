//! Client for the property-management system's booking and finance API.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::models::offer::Money;
use crate::models::Offer;

#[derive(Debug, Clone, PartialEq)]
pub struct OfferQuery {
    pub property_id: String,
    pub arrival: NaiveDate,
    pub departure: NaiveDate,
    pub adults: u32,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub guest: Guest,
    pub adults: u32,
    pub offer: Offer,
}

impl ReservationRequest {
    /// Booking payload in the wire format of the booking endpoint.
    pub fn to_payload(&self) -> serde_json::Value {
        let person = json!({
            "firstName": self.guest.first_name,
            "lastName": self.guest.last_name,
            "phone": self.guest.phone,
        });
        let time_slices: Vec<serde_json::Value> = self
            .offer
            .time_slices
            .iter()
            .map(|slice| {
                json!({
                    "ratePlanId": self.offer.rate_plan.id,
                    "totalAmount": slice.total_gross_amount,
                })
            })
            .collect();
        json!({
            "booker": person,
            "reservations": [{
                "arrival": self.offer.arrival,
                "departure": self.offer.departure,
                "adults": self.adults,
                "channelCode": "Direct",
                "primaryGuest": person,
                "timeSlices": time_slices,
            }],
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub is_posted: bool,
    pub amount: ChargeAmount,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargeAmount {
    #[serde(with = "rust_decimal::serde::float")]
    pub gross_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PendingPayment {
    pub amount: Money,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folio {
    pub id: String,
    pub balance: Money,
    #[serde(default)]
    pub charges: Vec<Charge>,
    #[serde(default)]
    pub pending_payments: Vec<PendingPayment>,
}

impl Folio {
    /// Open balance minus payments already underway, never below zero.
    pub fn amount_due(&self) -> Decimal {
        let pending: Decimal = self.pending_payments.iter().map(|p| p.amount.amount).sum();
        (-self.balance.amount - pending).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLinkRequest {
    pub folio_id: String,
    pub amount: Money,
    pub description: String,
    pub country_code: String,
    pub charges: Vec<Charge>,
}

#[async_trait]
pub trait BookingApi: Send + Sync {
    async fn search_offers(&self, query: &OfferQuery) -> anyhow::Result<Vec<Offer>>;
    async fn create_booking(&self, request: &ReservationRequest) -> anyhow::Result<String>;
    async fn find_open_folio(&self, booking_id: &str) -> anyhow::Result<Option<String>>;
    async fn get_folio(&self, folio_id: &str) -> anyhow::Result<Folio>;
    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> anyhow::Result<String>;
    async fn get_payment_link_url(&self, folio_id: &str, payment_id: &str) -> anyhow::Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    valid_until: Instant,
}

pub struct ApaleoClient {
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
    client: reqwest::Client,
}

impl ApaleoClient {
    pub fn new(base_url: String, token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url,
            client_id,
            client_secret,
            token: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    /// Client-credentials token, reused until shortly before it expires.
    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.valid_until > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("failed to request booking API token")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {body}");
        }

        let token: TokenResponse = resp.json().await.context("invalid token response")?;
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            valid_until: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to reach booking API: {path}"))?;
        check_status(resp, path).await
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach booking API: {path}"))?;
        check_status(resp, path).await
    }
}

async fn check_status(resp: reqwest::Response, path: &str) -> anyhow::Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("booking API {path} returned {status}: {body}");
    }
    Ok(resp)
}

#[derive(Deserialize)]
struct OffersResponse {
    #[serde(default)]
    offers: Vec<Offer>,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Deserialize)]
struct FolioListResponse {
    #[serde(default)]
    folios: Vec<FolioSummary>,
}

#[derive(Deserialize)]
struct FolioSummary {
    id: String,
    balance: Money,
}

#[derive(Deserialize)]
struct PaymentLinkResponse {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaidCharge<'a> {
    charge_id: &'a str,
    amount: Money,
}

#[async_trait]
impl BookingApi for ApaleoClient {
    async fn search_offers(&self, query: &OfferQuery) -> anyhow::Result<Vec<Offer>> {
        let token = self.access_token().await?;
        let path = "/booking/v1/offers";
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept-Language", &query.language)
            .query(&[
                ("propertyId", query.property_id.clone()),
                ("arrival", query.arrival.format("%Y-%m-%d").to_string()),
                ("departure", query.departure.format("%Y-%m-%d").to_string()),
                ("adults", query.adults.to_string()),
                ("channelCode", "Direct".to_string()),
            ])
            .send()
            .await
            .context("failed to search offers")?;

        // No availability comes back as 204 without a body.
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let resp = check_status(resp, path).await?;
        let body: OffersResponse = resp.json().await.context("invalid offers response")?;
        Ok(body.offers)
    }

    async fn create_booking(&self, request: &ReservationRequest) -> anyhow::Result<String> {
        let resp = self.post("/booking/v1/bookings", &request.to_payload()).await?;
        let created: CreatedResponse = resp.json().await.context("invalid booking response")?;
        Ok(created.id)
    }

    async fn find_open_folio(&self, booking_id: &str) -> anyhow::Result<Option<String>> {
        let resp = self
            .get("/finance/v1/folios", &[("bookingIds", booking_id.to_string())])
            .await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body: FolioListResponse = resp.json().await.context("invalid folio list")?;
        Ok(body
            .folios
            .into_iter()
            .find(|f| f.balance.amount < Decimal::ZERO)
            .map(|f| f.id))
    }

    async fn get_folio(&self, folio_id: &str) -> anyhow::Result<Folio> {
        let resp = self.get(&format!("/finance/v1/folios/{folio_id}"), &[]).await?;
        resp.json().await.context("invalid folio response")
    }

    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> anyhow::Result<String> {
        let paid_charges: Vec<PaidCharge<'_>> = request
            .charges
            .iter()
            .map(|c| PaidCharge {
                charge_id: &c.id,
                amount: Money {
                    amount: c.amount.gross_amount.abs(),
                    currency: c.amount.currency.clone(),
                },
            })
            .collect();
        let body = json!({
            "expiresAt": (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
            "countryCode": request.country_code,
            "description": request.description,
            "amount": request.amount,
            "paidCharges": paid_charges,
        });
        let resp = self
            .post(
                &format!("/finance/v1/folios/{}/payments/by-link", request.folio_id),
                &body,
            )
            .await?;
        let created: CreatedResponse = resp.json().await.context("invalid payment link response")?;
        Ok(created.id)
    }

    async fn get_payment_link_url(&self, folio_id: &str, payment_id: &str) -> anyhow::Result<String> {
        let resp = self
            .get(&format!("/finance/v1/folios/{folio_id}/payments/{payment_id}"), &[])
            .await?;
        let link: PaymentLinkResponse = resp.json().await.context("invalid payment response")?;
        Ok(link.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::offer::tests::offer;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_with_token(server: &MockServer) -> ApaleoClient {
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .expect(1)
            .mount(server)
            .await;
        ApaleoClient::new(
            server.uri(),
            format!("{}/connect/token", server.uri()),
            "client".into(),
            "secret".into(),
        )
    }

    fn query() -> OfferQuery {
        OfferQuery {
            property_id: "ALT".into(),
            arrival: NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
            departure: NaiveDate::from_ymd_opt(2030, 5, 3).unwrap(),
            adults: 2,
            language: "de-DE".into(),
        }
    }

    fn folio(balance: i64, pending: &[i64]) -> Folio {
        Folio {
            id: "F1".to_string(),
            balance: Money {
                amount: Decimal::from(balance),
                currency: "EUR".to_string(),
            },
            charges: Vec::new(),
            pending_payments: pending
                .iter()
                .map(|p| PendingPayment {
                    amount: Money {
                        amount: Decimal::from(*p),
                        currency: "EUR".to_string(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn test_amount_due_subtracts_pending() {
        assert_eq!(folio(-200, &[50]).amount_due(), Decimal::from(150));
        assert_eq!(folio(-200, &[250]).amount_due(), Decimal::ZERO);
        assert_eq!(folio(30, &[]).amount_due(), Decimal::ZERO);
    }

    #[test]
    fn test_reservation_payload() {
        let request = ReservationRequest {
            guest: Guest {
                first_name: "Anna".into(),
                last_name: "Huber".into(),
                phone: "+491712345678".into(),
            },
            adults: 2,
            offer: offer("Double", 2, 240),
        };
        let payload = request.to_payload();
        let reservation = &payload["reservations"][0];
        assert_eq!(payload["booker"]["lastName"], "Huber");
        assert_eq!(reservation["adults"], 2);
        assert_eq!(reservation["channelCode"], "Direct");
        assert_eq!(reservation["primaryGuest"]["phone"], "+491712345678");
        assert_eq!(reservation["timeSlices"][0]["ratePlanId"], "RP-Double");
    }

    #[tokio::test]
    async fn test_offer_search_reuses_token() {
        let server = MockServer::start().await;
        let client = client_with_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/booking/v1/offers"))
            .and(header("authorization", "Bearer tok"))
            .and(header("accept-language", "de-DE"))
            .and(query_param("propertyId", "ALT"))
            .and(query_param("arrival", "2030-05-01"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"offers": [offer("Double", 2, 240)]})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let offers = client.search_offers(&query()).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].unit_group.name, "Double");
        client.search_offers(&query()).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_availability_is_empty() {
        let server = MockServer::start().await;
        let client = client_with_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/booking/v1/offers"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(client.search_offers(&query()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_folio_has_negative_balance() {
        let server = MockServer::start().await;
        let client = client_with_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/finance/v1/folios"))
            .and(query_param("bookingIds", "B1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folios": [
                    {"id": "F-settled", "balance": {"amount": 0.0, "currency": "EUR"}},
                    {"id": "F-open", "balance": {"amount": -240.0, "currency": "EUR"}}
                ]
            })))
            .mount(&server)
            .await;

        assert_eq!(
            client.find_open_folio("B1").await.unwrap().as_deref(),
            Some("F-open")
        );
    }

    #[tokio::test]
    async fn test_booking_error_status_is_reported() {
        let server = MockServer::start().await;
        let client = client_with_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/booking/v1/bookings"))
            .respond_with(ResponseTemplate::new(422).set_body_string("rate plan closed"))
            .mount(&server)
            .await;

        let request = ReservationRequest {
            guest: Guest {
                first_name: "Anna".into(),
                last_name: "Huber".into(),
                phone: "+491712345678".into(),
            },
            adults: 2,
            offer: offer("Double", 2, 240),
        };
        let err = client.create_booking(&request).await.unwrap_err();
        assert!(err.to_string().contains("422"));
    }
}
