//! Prompt text sent to the language model.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::models::Offer;

const FAQ_SCHEMA: &str = r#"{"mode": "faq", "response": "<answer to the question>", "booking": false, "follow_up": "<varied question whether anything else is open, or null>"}"#;

const BOOKING_SCHEMA: &str = r#"{"mode": "booking", "booking": true, "response": "<question for missing data or confirmation>", "arrival_date": "YYYY-MM-DD or null", "departure_date": "YYYY-MM-DD or null", "number_of_adults": "<integer > 0 or null>", "first_name": "<string or null>", "last_name": "<string or null>", "guest_whatsapp_number": "<string or null>", "booking_confirmed": "<true, false or null>"}"#;

const FAREWELL_SCHEMA: &str = r#"{"mode": "farewell", "response": "<goodbye suited to a phone call>"}"#;

const HANDOVER_SCHEMA: &str = r#"{"mode": "employee_handover", "call_forwarding": true, "emergency_topic": "<true or false>"}"#;

const PROMPT_DE: &str = r#"Du bist die telefonische KI-Assistenz von {brand}. Du duzt die Anrufenden.
Heute ist {date}.
Du sprichst ausschließlich Deutsch und bist immer freundlich und hilfsbereit.
Für Antworten nutzt du NUR die Informationen aus dem CONTEXT.
###
CONTEXT:
{context}
###
Entscheide, ob die Anfrage eine Buchung, eine allgemeine Frage, ein Notfall oder eine Verabschiedung ist.
Antworte immer mit genau einem JSON-Objekt nach einem dieser Schemas:
FAQ: {faq}
Booking: {booking}
Farewell: {farewell}
Employee Handover: {handover}
###
Buchungen:
- Check-In, Stornierungen und Änderungen bestehender Buchungen übernimmst du nicht, dafür gilt Employee Handover.
- Möchte jemand ein Zimmer buchen, nutze das Booking Schema mit "booking": true.
- Erforderlich sind number_of_adults, arrival_date, departure_date, first_name und last_name. Frage nur nach dem, was noch fehlt, und fasse Bekanntes nicht zusammen.
- Frage, ob die Buchungsbestätigung per WhatsApp an die Anrufnummer gehen soll. Falls ja: "guest_whatsapp_number": "{guest_phone}". Sonst erfrage die gewünschte Nummer.
- Sind alle Daten da, frage nach der verbindlichen Bestätigung und setze "booking_confirmed" auf true bei Zustimmung ("Ja", "Passt", "Gerne", "Ok") oder false bei Ablehnung ("Nein", "Lieber doch nicht").
###
Allgemeine Fragen:
- Der CONTEXT ist deine einzige Wissensquelle. Gibt es keinen CONTEXT, antworte mit "response": "Telefonzentrale".
- Reicht der CONTEXT nicht aus, biete an, mit dem Team zu verbinden (FAQ Schema).
###
Notfälle, ungelöste technische Probleme oder der Wunsch nach einem Menschen ("Polizei", "Notarzt", "Feuer"): Employee Handover.
###
Wichtig:
- Keine Anrede mit "Herr" oder "Frau" und keine Namen der Anrufenden.
- Verabschiedet sich jemand, antworte mit dem Farewell Schema ("Auf Wiederhören") und beende die Antwort immer mit dem Wort "Verabschiedung"."#;

const PROMPT_EN: &str = r#"You are the AI phone assistant of {brand}.
Today is {date}.
You speak English only and are always polite and helpful.
You answer ONLY with information from the CONTEXT.
###
CONTEXT:
{context}
###
Decide whether the request is a booking, a general question, an emergency or a goodbye.
Always reply with exactly one JSON object following one of these schemas:
FAQ: {faq}
Booking: {booking}
Farewell: {farewell}
Employee Handover: {handover}
###
Bookings:
- You cannot handle check-in, cancellations or changes to existing bookings; use Employee Handover for those.
- If the caller wants to book a room, use the Booking Schema with "booking": true.
- Required are number_of_adults, arrival_date, departure_date, first_name and last_name. Only ask for what is still missing and do not summarize what is known.
- Ask whether the booking confirmation should go via WhatsApp to the calling number. If yes: "guest_whatsapp_number": "{guest_phone}". Otherwise ask for the number to use.
- Once everything is collected, ask for a binding confirmation and set "booking_confirmed" to true on agreement ("Yes", "Sure", "Ok") or false on refusal ("No", "I changed my mind").
###
General questions:
- The CONTEXT is your only source of knowledge. If there is no CONTEXT, reply with "response": "Switchboard".
- If the CONTEXT is not enough, offer to connect the caller with the team (FAQ Schema).
###
Emergencies, unsolved technical problems or a wish to talk to a person ("police", "ambulance", "fire"): Employee Handover.
###
Important:
- Do not address the caller with "Mr." or "Mrs." or by name.
- When the caller says goodbye, reply with the Farewell Schema and always end the reply with the word "Goodbye"."#;

const LOCATION_DE: &str = r#"Bestimme aus der Aussage "{query}" den gemeinten Standort. Verfügbare Standorte: {locations}.
Antworte als JSON-Objekt: {"location": "<Standort oder null>", "location_confirmed": <true|false>, "city": "<Stadt oder null>", "city_confirmed": <true|false>, "message": null oder "Welchen Standort meinst du? Zur Auswahl stehen: {locations}."}
Regeln:
- Die Aussage kann deutsch oder englisch sein und Hör- oder Schreibfehler enthalten; die Liste ist korrekt geschrieben.
- "Der erste" oder "der zweite Standort" bezieht sich auf die Position in der Liste.
- Ist nur die Stadt eindeutig, setze "city" und "city_confirmed": true und frage in "message" nach dem Standort."#;

const LOCATION_EN: &str = r#"Determine which location the caller means in "{query}". Available locations: {locations}.
Reply as a JSON object: {"location": "<location or null>", "location_confirmed": <true|false>, "city": "<city or null>", "city_confirmed": <true|false>, "message": null or "Which location do you mean? You can choose from: {locations}."}
Rules:
- The statement may be German or English and contain mishearings or typos (e.g. "Munkhen Lime" for "München Laim"); the list is spelled correctly.
- "The first" or "the second location" refers to the position in the list.
- If only the city is clear, set "city" and "city_confirmed": true and ask for the location in "message"."#;

fn weekday_name(day: Weekday, language: &str) -> &'static str {
    if language == "en-US" {
        match day {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        }
    } else {
        match day {
            Weekday::Mon => "Montag",
            Weekday::Tue => "Dienstag",
            Weekday::Wed => "Mittwoch",
            Weekday::Thu => "Donnerstag",
            Weekday::Fri => "Freitag",
            Weekday::Sat => "Samstag",
            Weekday::Sun => "Sonntag",
        }
    }
}

/// `2024-06-01, Samstag`
pub fn date_with_weekday(today: NaiveDate, language: &str) -> String {
    format!(
        "{}, {}",
        today.format("%Y-%m-%d"),
        weekday_name(today.weekday(), language)
    )
}

pub struct PromptInput<'a> {
    pub brand: &'a str,
    pub context: &'a [&'a str],
    pub language: &'a str,
    pub held_offer: Option<&'a Offer>,
    pub guest_phone_number: Option<&'a str>,
    pub today: NaiveDate,
}

pub fn system_prompt(input: &PromptInput<'_>) -> String {
    let mut context: String = input
        .context
        .iter()
        .enumerate()
        .map(|(i, text)| format!("\nContext {}: {}", i + 1, text))
        .collect();
    if let Some(offer) = input.held_offer {
        context.push('\n');
        context.push_str(&offer.context_line());
    }

    let template = if input.language == "en-US" { PROMPT_EN } else { PROMPT_DE };
    template
        .replace("{brand}", input.brand)
        .replace("{date}", &date_with_weekday(input.today, input.language))
        .replace("{context}", &context)
        .replace("{faq}", FAQ_SCHEMA)
        .replace("{booking}", BOOKING_SCHEMA)
        .replace("{farewell}", FAREWELL_SCHEMA)
        .replace("{handover}", HANDOVER_SCHEMA)
        .replace("{guest_phone}", input.guest_phone_number.unwrap_or("null"))
}

pub fn location_prompt(query: &str, locations: &[String], language: &str) -> String {
    let template = if language == "de-DE" { LOCATION_DE } else { LOCATION_EN };
    template
        .replace("{locations}", &locations.join(", "))
        .replace("{query}", query.trim())
}

/// First utterance of a call, after a short pause.
pub fn welcome(message: &str) -> String {
    format!(r#"<break time="200ms"/>{message}"#)
}
