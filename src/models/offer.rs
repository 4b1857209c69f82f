use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Money {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_persons: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CancellationFee {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatePlan {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlice {
    pub total_gross_amount: Money,
}

/// One bookable room offer as returned by the availability search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub arrival: String,
    pub departure: String,
    pub unit_group: UnitGroup,
    pub rate_plan: RatePlan,
    pub total_gross_amount: Money,
    #[serde(default)]
    pub cancellation_fee: CancellationFee,
    #[serde(default)]
    pub time_slices: Vec<TimeSlice>,
}

impl Offer {
    /// Room line used as extra prompt context once an offer is held.
    pub fn context_line(&self) -> String {
        format!("{}: {}", self.unit_group.name, self.unit_group.description)
    }

    /// Spoken description of the offer, read to the caller before confirmation.
    pub fn spoken_summary(&self, language: &str) -> String {
        let unit = &self.unit_group.name;
        let price = self.total_gross_amount.amount.round_dp(2).normalize();
        let currency = &self.total_gross_amount.currency;
        let fee = &self.cancellation_fee;
        let flexible = fee.name.eq_ignore_ascii_case("flexible");

        if language == "de-DE" {
            if flexible {
                format!(
                    "{unit} für {price} {currency}. Die Stornierungsbedingungen sind {} und erlauben eine kostenfreie Stornierung bis zum Check-In.",
                    fee.name
                )
            } else {
                format!("{unit} für {price} {currency}. {}.", fee.description.trim_end_matches('.'))
            }
        } else if flexible {
            format!(
                "{unit} for {price} {currency}. The cancellation policy is {} and allows {}.",
                fee.name,
                fee.description.trim_end_matches('.')
            )
        } else {
            format!("{unit} for {price} {currency}. {}.", fee.description.trim_end_matches('.'))
        }
    }
}

/// Rooms sized exactly for the party win over rooms with one spare bed; within
/// a tier the most expensive offer is chosen, the first one on ties.
pub fn select_offer(offers: &[Offer], adults: u32) -> Option<&Offer> {
    most_expensive(offers, adults).or_else(|| most_expensive(offers, adults + 1))
}

fn most_expensive(offers: &[Offer], capacity: u32) -> Option<&Offer> {
    offers
        .iter()
        .filter(|o| o.unit_group.max_persons == capacity)
        .fold(None, |best: Option<&Offer>, offer| match best {
            Some(b) if b.total_gross_amount.amount >= offer.total_gross_amount.amount => Some(b),
            _ => Some(offer),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn offer(name: &str, capacity: u32, price: i64) -> Offer {
        Offer {
            arrival: "2025-03-01T15:00:00+01:00".to_string(),
            departure: "2025-03-03T11:00:00+01:00".to_string(),
            unit_group: UnitGroup {
                name: name.to_string(),
                description: format!("{name} room"),
                max_persons: capacity,
            },
            rate_plan: RatePlan { id: format!("RP-{name}") },
            total_gross_amount: Money {
                amount: Decimal::from(price),
                currency: "EUR".to_string(),
            },
            cancellation_fee: CancellationFee {
                name: "Flexible".to_string(),
                description: "free cancellation until check-in".to_string(),
            },
            time_slices: vec![TimeSlice {
                total_gross_amount: Money {
                    amount: Decimal::from(price),
                    currency: "EUR".to_string(),
                },
            }],
        }
    }

    #[test]
    fn test_select_exact_capacity_highest_price() {
        let offers = vec![
            offer("Single", 1, 80),
            offer("Double", 2, 120),
            offer("Double Deluxe", 2, 150),
            offer("Triple", 3, 200),
        ];
        let chosen = select_offer(&offers, 2).unwrap();
        assert_eq!(chosen.unit_group.name, "Double Deluxe");
    }

    #[test]
    fn test_select_falls_back_to_one_spare_bed() {
        let offers = vec![offer("Single", 1, 80), offer("Triple", 3, 200)];
        assert_eq!(select_offer(&offers, 2).unwrap().unit_group.name, "Triple");
    }

    #[test]
    fn test_select_none_when_no_tier_matches() {
        let offers = vec![
            offer("Single", 1, 80),
            offer("Double", 2, 120),
            offer("Double Deluxe", 2, 150),
            offer("Triple", 3, 200),
        ];
        assert!(select_offer(&offers, 4).is_none());
        assert!(select_offer(&[], 2).is_none());
    }

    #[test]
    fn test_select_tie_keeps_first() {
        let offers = vec![offer("A", 2, 100), offer("B", 2, 100)];
        assert_eq!(select_offer(&offers, 2).unwrap().unit_group.name, "A");
    }

    #[test]
    fn test_offer_json_shape() {
        let raw = r#"{
            "arrival": "2025-03-01T15:00:00+01:00",
            "departure": "2025-03-03T11:00:00+01:00",
            "unitGroup": {"id": "X", "name": "Double", "description": "Queen bed", "maxPersons": 2},
            "ratePlan": {"id": "MUC-FLEX", "code": "FLEX"},
            "totalGrossAmount": {"amount": 189.5, "currency": "EUR"},
            "cancellationFee": {"name": "Flexible", "description": "free until check-in"},
            "timeSlices": [{"from": "x", "to": "y", "totalGrossAmount": {"amount": 94.75, "currency": "EUR"}}]
        }"#;
        let offer: Offer = serde_json::from_str(raw).unwrap();
        assert_eq!(offer.total_gross_amount.amount, Decimal::new(1895, 1));
        assert_eq!(offer.time_slices.len(), 1);
        assert_eq!(offer.context_line(), "Double: Queen bed");
    }

    #[test]
    fn test_spoken_summary() {
        let o = offer("Double", 2, 120);
        let de = o.spoken_summary("de-DE");
        assert!(de.starts_with("Double für 120 EUR."));
        assert!(de.contains("kostenfreie Stornierung"));
        let en = o.spoken_summary("en-US");
        assert!(en.contains("allows free cancellation until check-in."));
    }
}
