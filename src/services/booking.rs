//! Reservation, payment link and guest notification after a caller confirms.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::offer::Money;
use crate::models::Session;
use crate::services::alerts::{self, OpsAlert};
use crate::services::messaging::{to_international, MessagingProvider};
use crate::services::pms::{BookingApi, Guest, PaymentLinkRequest, ReservationRequest};
use crate::services::texts::TextCatalog;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("no offer is held for this call")]
    NoHeldOffer,
    #[error("booking data incomplete: {0}")]
    Incomplete(String),
    #[error("no phone number to send the payment link to")]
    NoContactNumber,
    #[error("no open folio for booking {0}")]
    NoOpenFolio(String),
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// Everything the detached workflow needs, captured at confirmation time.
#[derive(Debug, Clone)]
pub struct BookingJob {
    pub session_id: String,
    pub property_name: String,
    pub language: String,
    pub reservation: ReservationRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingOutcome {
    pub booking_id: String,
    pub folio_id: String,
    pub payment_url: String,
}

impl BookingJob {
    pub fn prepare(session: &Session) -> Result<Self, BookingError> {
        let offer = session.held_offer().ok_or(BookingError::NoHeldOffer)?;
        let slots = session.booking.validate().map_err(|errors| {
            BookingError::Incomplete(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;
        let phone = session
            .booking
            .contact_number()
            .map(to_international)
            .filter(|n| !n.is_empty())
            .ok_or(BookingError::NoContactNumber)?;

        Ok(Self {
            session_id: session.id.clone(),
            property_name: session.property_name.clone().unwrap_or_default(),
            language: session.language.clone(),
            reservation: ReservationRequest {
                guest: Guest {
                    first_name: slots.first_name,
                    last_name: slots.last_name,
                    phone,
                },
                adults: slots.adults,
                offer: offer.clone(),
            },
        })
    }

    fn success_alert(&self, outcome: &BookingOutcome) -> OpsAlert {
        let r = &self.reservation;
        OpsAlert::info(
            "New phone booking",
            format!("Booking created for {}", self.property_name),
        )
        .detail("Booking ID", &outcome.booking_id)
        .detail("First Name", &r.guest.first_name)
        .detail("Last Name", &r.guest.last_name)
        .detail("Whatsapp Phone Number", &r.guest.phone)
        .detail("Adults", r.adults)
        .detail("Offer Chosen", &r.offer.unit_group.name)
        .detail(
            "Price",
            format!(
                "{} {}",
                r.offer.total_gross_amount.amount, r.offer.total_gross_amount.currency
            ),
        )
        .detail("Arrival Date", &r.offer.arrival)
        .detail("Departure Date", &r.offer.departure)
    }

    fn failure_alert(&self, error: &BookingError) -> OpsAlert {
        OpsAlert::error(
            "Phone booking failed",
            format!("Booking for {} could not be completed", self.property_name),
        )
        .detail("Error Message", error)
        .detail("Reservation Data", self.reservation.to_payload())
    }
}

/// Create the booking, request a payment link for the open balance and send
/// it to the guest. Nothing is rolled back when a later step fails.
pub async fn complete_booking(
    api: &dyn BookingApi,
    messaging: &dyn MessagingProvider,
    config: &AppConfig,
    texts: &TextCatalog,
    job: &BookingJob,
) -> Result<BookingOutcome, BookingError> {
    let booking_id = api.create_booking(&job.reservation).await?;
    tracing::info!(session = %job.session_id, booking_id = %booking_id, "booking created");

    let folio_id = api
        .find_open_folio(&booking_id)
        .await?
        .ok_or_else(|| BookingError::NoOpenFolio(booking_id.clone()))?;
    let folio = api.get_folio(&folio_id).await?;
    let currency = folio.balance.currency.clone();
    let amount = folio.amount_due();

    let payment_id = api
        .create_payment_link(&PaymentLinkRequest {
            folio_id: folio_id.clone(),
            amount: Money {
                amount,
                currency,
            },
            description: format!("Booking {booking_id}"),
            country_code: config.payment_country_code.clone(),
            charges: folio.charges.clone(),
        })
        .await?;

    // The payment provider needs a moment before the link resolves.
    tokio::time::sleep(Duration::from_secs(config.payment_link_delay_secs)).await;
    let payment_url = api.get_payment_link_url(&folio_id, &payment_id).await?;

    let guest_phone = &job.reservation.guest.phone;
    if config.whatsapp_content_sid.is_empty() {
        let text = texts.get_with("payment_link_message", &job.language, &[("url", &payment_url)]);
        messaging.send_message(guest_phone, &text).await?;
    } else {
        let link_id = payment_url
            .strip_prefix(config.payment_link_prefix.as_str())
            .unwrap_or(&payment_url);
        messaging
            .send_template(guest_phone, &config.whatsapp_content_sid, &[("1", link_id)])
            .await?;
    }

    tracing::info!(
        session = %job.session_id,
        booking_id = %booking_id,
        amount = %amount,
        "payment link sent"
    );

    Ok(BookingOutcome {
        booking_id,
        folio_id,
        payment_url,
    })
}

/// Run the workflow detached from the call. Failures surface only as an
/// operations alert and an error note on the stored call.
pub fn spawn(state: Arc<AppState>, job: BookingJob) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let result = complete_booking(
            state.booking_api.as_ref(),
            state.messaging.as_ref(),
            &state.config,
            &state.texts,
            &job,
        )
        .await;

        match result {
            Ok(outcome) => {
                alerts::raise(state.notifier.as_ref(), job.success_alert(&outcome)).await;
            }
            Err(e) => {
                tracing::error!(target: "incident", session = %job.session_id, error = %e, "booking workflow failed");
                if let Err(db_err) = annotate_failure(&state, &job.session_id, &e.to_string()).await {
                    tracing::error!(session = %job.session_id, error = %db_err, "failed to record booking error");
                }
                alerts::raise(state.notifier.as_ref(), job.failure_alert(&e)).await;
            }
        }
    })
}

async fn annotate_failure(state: &AppState, session_id: &str, error: &str) -> anyhow::Result<()> {
    let _guard = state.session_locks.acquire(session_id).await;
    let db = state.db()?;
    if let Some(mut session) = queries::get_session(&db, session_id)? {
        session.booking.error = Some(error.to_string());
        session.updated_at = chrono::Utc::now().naive_utc();
        queries::update_session(&db, &session)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::offer::tests::offer;
    use crate::models::Offer;
    use crate::services::pms::{Folio, OfferQuery};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub(crate) sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingProvider for RecordingMessenger {
        async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }

        async fn send_template(
            &self,
            to: &str,
            content_sid: &str,
            variables: &[(&str, &str)],
        ) -> anyhow::Result<()> {
            let vars: Vec<String> = variables.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), format!("{content_sid}:{}", vars.join("&"))));
            Ok(())
        }
    }

    struct StubApi {
        folio: Option<&'static str>,
    }

    #[async_trait]
    impl BookingApi for StubApi {
        async fn search_offers(&self, _query: &OfferQuery) -> anyhow::Result<Vec<Offer>> {
            Ok(Vec::new())
        }
        async fn create_booking(&self, _request: &ReservationRequest) -> anyhow::Result<String> {
            Ok("BOOK-1".to_string())
        }
        async fn find_open_folio(&self, _booking_id: &str) -> anyhow::Result<Option<String>> {
            Ok(self.folio.map(str::to_string))
        }
        async fn get_folio(&self, folio_id: &str) -> anyhow::Result<Folio> {
            Ok(serde_json::from_value(serde_json::json!({
                "id": folio_id,
                "balance": {"amount": -240.0, "currency": "EUR"},
                "charges": [{"id": "C1", "isPosted": true, "amount": {"grossAmount": 240.0, "currency": "EUR"}}],
                "pendingPayments": []
            }))?)
        }
        async fn create_payment_link(&self, request: &PaymentLinkRequest) -> anyhow::Result<String> {
            anyhow::ensure!(request.amount.amount == Decimal::from(240), "wrong amount");
            Ok("PAY-1".to_string())
        }
        async fn get_payment_link_url(&self, _folio_id: &str, _payment_id: &str) -> anyhow::Result<String> {
            Ok("https://test.adyen.link/PL123".to_string())
        }
    }

    fn session() -> Session {
        let mut session = Session::new(
            "c1",
            Some("0171 2345678".to_string()),
            "de-DE",
            "voice",
            chrono::Utc::now().naive_utc(),
        );
        session.property_name = Some("Landshut".to_string());
        session.booking.arrival_date = Some("2030-03-01".to_string());
        session.booking.departure_date = Some("2030-03-03".to_string());
        session.booking.number_of_adults = Some(2);
        session.booking.first_name = Some("Anna".to_string());
        session.booking.last_name = Some("Huber".to_string());
        session.booking.guest_phone_number = Some("0171 2345678".to_string());
        session.offers = vec![offer("Double", 2, 240)];
        session
    }

    fn config(content_sid: &str) -> AppConfig {
        AppConfig {
            payment_link_delay_secs: 0,
            whatsapp_content_sid: content_sid.to_string(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_prepare_requires_held_offer() {
        let mut s = session();
        s.offers.clear();
        assert!(matches!(BookingJob::prepare(&s), Err(BookingError::NoHeldOffer)));
    }

    #[test]
    fn test_prepare_uses_international_caller_number() {
        let job = BookingJob::prepare(&session()).unwrap();
        assert_eq!(job.reservation.guest.phone, "+491712345678");
        assert_eq!(job.reservation.adults, 2);
        assert_eq!(job.property_name, "Landshut");
    }

    #[test]
    fn test_prepare_reports_missing_slots() {
        let mut s = session();
        s.booking.last_name = None;
        match BookingJob::prepare(&s) {
            Err(BookingError::Incomplete(msg)) => assert!(msg.contains("last_name")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_booking_sends_template_link() {
        let messenger = RecordingMessenger::default();
        let job = BookingJob::prepare(&session()).unwrap();
        let outcome = complete_booking(
            &StubApi { folio: Some("F1") },
            &messenger,
            &config("HX1"),
            &TextCatalog::builtin().unwrap(),
            &job,
        )
        .await
        .unwrap();

        assert_eq!(outcome.booking_id, "BOOK-1");
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent[0], ("+491712345678".to_string(), "HX1:1=PL123".to_string()));
    }

    #[tokio::test]
    async fn test_complete_booking_plain_message_without_template() {
        let messenger = RecordingMessenger::default();
        let job = BookingJob::prepare(&session()).unwrap();
        complete_booking(
            &StubApi { folio: Some("F1") },
            &messenger,
            &config(""),
            &TextCatalog::builtin().unwrap(),
            &job,
        )
        .await
        .unwrap();
        assert!(messenger.sent.lock().unwrap()[0].1.contains("https://test.adyen.link/PL123"));
    }

    #[tokio::test]
    async fn test_missing_folio_fails() {
        let messenger = RecordingMessenger::default();
        let job = BookingJob::prepare(&session()).unwrap();
        let err = complete_booking(
            &StubApi { folio: None },
            &messenger,
            &config("HX1"),
            &TextCatalog::builtin().unwrap(),
            &job,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookingError::NoOpenFolio(id) if id == "BOOK-1"));
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failure_alert_carries_reservation() {
        let job = BookingJob::prepare(&session()).unwrap();
        let alert = job.failure_alert(&BookingError::NoOpenFolio("B".into()));
        assert!(alert.is_error);
        assert!(alert.details.iter().any(|(k, v)| k == "Reservation Data" && v.contains("Huber")));
    }
}
