use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::intent::BookingReply;

/// Booking details collected across turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingSlots {
    pub arrival_date: Option<String>,
    pub departure_date: Option<String>,
    pub number_of_adults: Option<u32>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub guest_whatsapp_number: Option<String>,
    pub booking_confirmed: Option<bool>,
    /// Derived from the caller id, not asked for.
    pub guest_phone_number: Option<String>,
    pub property_name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("{0} is missing")]
    Missing(&'static str),
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SlotError {
    pub fn field(&self) -> &'static str {
        match self {
            SlotError::Missing(field) => field,
            SlotError::Invalid { field, .. } => field,
        }
    }
}

/// Slots that passed validation and can be used for an availability search.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadySlots {
    pub arrival: NaiveDate,
    pub departure: NaiveDate,
    pub adults: u32,
    pub first_name: String,
    pub last_name: String,
}

impl BookingSlots {
    /// Copy every slot the model filled in this turn.
    pub fn merge(&mut self, reply: &BookingReply) {
        fn take(target: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }
        take(&mut self.arrival_date, &reply.arrival_date);
        take(&mut self.departure_date, &reply.departure_date);
        take(&mut self.first_name, &reply.first_name);
        take(&mut self.last_name, &reply.last_name);
        take(&mut self.guest_whatsapp_number, &reply.guest_whatsapp_number);
        if reply.number_of_adults.is_some() {
            self.number_of_adults = reply.number_of_adults;
        }
        if reply.booking_confirmed.is_some() {
            self.booking_confirmed = reply.booking_confirmed;
        }
    }

    pub fn reset(&mut self) {
        let guest_phone_number = self.guest_phone_number.take();
        *self = Self {
            guest_phone_number,
            ..Self::default()
        };
    }

    pub fn has_any_slot(&self) -> bool {
        self.arrival_date.is_some()
            || self.departure_date.is_some()
            || self.number_of_adults.is_some()
            || self.first_name.is_some()
            || self.last_name.is_some()
            || self.guest_whatsapp_number.is_some()
            || self.booking_confirmed.is_some()
    }

    pub fn validate(&self) -> Result<ReadySlots, Vec<SlotError>> {
        let mut errors = Vec::new();

        let arrival = parse_date("arrival_date", self.arrival_date.as_deref(), &mut errors);
        let departure = parse_date("departure_date", self.departure_date.as_deref(), &mut errors);

        let adults = match self.number_of_adults {
            None => {
                errors.push(SlotError::Missing("number_of_adults"));
                None
            }
            Some(0) => {
                errors.push(SlotError::Invalid {
                    field: "number_of_adults",
                    reason: "must be at least 1".to_string(),
                });
                None
            }
            Some(n) => Some(n),
        };

        let first_name = required_text("first_name", self.first_name.as_deref(), &mut errors);
        let last_name = required_text("last_name", self.last_name.as_deref(), &mut errors);

        match (arrival, departure, adults, first_name, last_name) {
            (Some(arrival), Some(departure), Some(adults), Some(first_name), Some(last_name))
                if errors.is_empty() =>
            {
                Ok(ReadySlots {
                    arrival,
                    departure,
                    adults,
                    first_name,
                    last_name,
                })
            }
            _ => Err(errors),
        }
    }

    /// Number the booking confirmation goes to.
    pub fn contact_number(&self) -> Option<&str> {
        self.guest_whatsapp_number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.guest_phone_number.as_deref())
    }
}

fn parse_date(
    field: &'static str,
    value: Option<&str>,
    errors: &mut Vec<SlotError>,
) -> Option<NaiveDate> {
    let Some(raw) = value else {
        errors.push(SlotError::Missing(field));
        return None;
    };
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(SlotError::Invalid {
                field,
                reason: format!("expected YYYY-MM-DD, got {raw:?}"),
            });
            None
        }
    }
}

fn required_text(
    field: &'static str,
    value: Option<&str>,
    errors: &mut Vec<SlotError>,
) -> Option<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            errors.push(SlotError::Missing(field));
            None
        }
    }
}

/// Callers often name a date without a year and the model fills in a past
/// one. Moves each deficient date forward whole years, keeping month and day.
pub fn correct_stay_dates(
    arrival: NaiveDate,
    departure: NaiveDate,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let mut arrival = arrival;
    let mut departure = departure;
    while arrival < today {
        arrival = next_year(arrival);
    }
    while departure <= today {
        departure = next_year(departure);
    }
    (arrival, departure)
}

fn next_year(date: NaiveDate) -> NaiveDate {
    let year = date.year() + 1;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28))
        .unwrap_or(date)
}
