//! Rewrites bot text into SSML the speech synthesizer pronounces well.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<lang xml:lang="[^"]*">[^<]*</lang>|<say-as[^>]*>.*?</say-as>|<[^>]+>"#).unwrap()
});

static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F600}-\x{1F64F}",
        r"\x{1F300}-\x{1F5FF}",
        r"\x{1F680}-\x{1F6FF}",
        r"\x{1F1E0}-\x{1F1FF}",
        r"\x{2700}-\x{27BF}",
        r"\x{1F900}-\x{1F9FF}",
        r"\x{2600}-\x{26FF}",
        r"\x{2B00}-\x{2BFF}",
        r"\x{1FA70}-\x{1FAFF}",
        r"\x{1F700}-\x{1F77F}",
        r"\x{2300}-\x{23FF}",
        "]+"
    ))
    .unwrap()
});

static AMPERSAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*&\s*").unwrap());

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5,}\b").unwrap());

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,2}\.\d{1,2}\.\d{2,4}|\d{1,2}-\d{1,2}-\d{2,4}|\d{4}\.\d{1,2}\.\d{1,2}|\d{4}-\d{1,2}-\d{1,2})\b")
        .unwrap()
});

static MARKED_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})[:.](\d{2})\s?(am|pm|uhr)\b").unwrap());

static PLAIN_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").unwrap());

static EMPTY_LANG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<lang xml:lang="[^"]*"></lang>"#).unwrap());

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\w.-]+)@([\w.-]+\.\w+)").unwrap());

/// Compound brand names the synthesizer runs together.
const BRAND_SPLITS: &[(&str, &str)] = &[
    ("metropolraduhr", "metropol raduhr "),
    ("sleepinroomz", "sleep in roomz "),
];

/// German words read with German pronunciation inside English speech.
const GERMAN_IN_ENGLISH: &[&str] = &[
    "tanke", "Blaubach", "Waidmarkt", "hallo", "Vringsveedel", "Barbarossaplatz", "Poststraße",
    "Messe Deutz", "Blocklemünd", "Pragfriedhof", "Rhein", "Stadium", "Neumarkt",
    "Severinstraße", "Rewe", "Airbnb",
];

/// English words read with English pronunciation inside German speech.
const ENGLISH_IN_GERMAN: &[&str] = &[
    "Suites", "Late", "Early", "Flexible", "Bumbee", "Call a bike", "nextbike", "Do-not-disturb",
    "King-Size", "quality", "Dream", "KONCEPT", "koncept", "Hi", "Hey",
];

static BRAND_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    BRAND_SPLITS
        .iter()
        .map(|(word, replacement)| {
            (Regex::new(&format!("(?i){}", regex::escape(word))).unwrap(), *replacement)
        })
        .collect()
});

fn word_list_pattern(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
}

static GERMAN_WORDS: Lazy<Regex> = Lazy::new(|| word_list_pattern(GERMAN_IN_ENGLISH));
static ENGLISH_WORDS: Lazy<Regex> = Lazy::new(|| word_list_pattern(ENGLISH_IN_GERMAN));

/// Apply `f` to the text between markup, leaving tags and marked-up spans alone.
fn map_plain(text: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in MARKUP.find_iter(text) {
        out.push_str(&f(&text[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&f(&text[last..]));
    out
}

pub fn strip_emoji(text: &str) -> String {
    EMOJI.replace_all(text, "").into_owned()
}

/// Wrap SSML in the configured speaking rate.
pub fn prosody(text: &str, rate: &str) -> String {
    format!(r#"<prosody rate="{rate}">{text}</prosody>"#)
}

pub struct SpeechFormatter {
    current_year: i32,
}

impl SpeechFormatter {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    /// Best effort: anything that does not parse is left as written.
    pub fn format(&self, text: &str, language: &str) -> String {
        let english = language == "en-US";
        let and_word = if english { " and " } else { " und " };

        let mut text = strip_emoji(text);
        text = map_plain(&text, |s| {
            BRAND_PATTERNS
                .iter()
                .fold(s.to_string(), |acc, (re, rep)| re.replace_all(&acc, *rep).into_owned())
        });
        text = map_plain(&text, |s| AMPERSAND.replace_all(s, and_word).into_owned());
        text = map_plain(&text, |s| {
            DIGIT_RUN
                .replace_all(s, r#"<say-as interpret-as="digits">$0</say-as>"#)
                .into_owned()
        });
        text = map_plain(&text, |s| {
            DATE.replace_all(s, |c: &Captures| self.date_markup(&c[0]).unwrap_or_else(|| c[0].to_string()))
                .into_owned()
        });
        text = map_plain(&text, |s| {
            MARKED_TIME
                .replace_all(s, |c: &Captures| marked_time(c).unwrap_or_else(|| c[0].to_string()))
                .into_owned()
        });
        text = map_plain(&text, |s| {
            PLAIN_TIME
                .replace_all(s, |c: &Captures| plain_time(c).unwrap_or_else(|| c[0].to_string()))
                .into_owned()
        });
        text = map_plain(&text, |s| {
            EMAIL.replace_all(s, |c: &Captures| spell_email(&c[1], &c[2], english)).into_owned()
        });

        let (words, other_language) = if english {
            (&*GERMAN_WORDS, "de-DE")
        } else {
            (&*ENGLISH_WORDS, "en-US")
        };
        text = map_plain(&text, |s| {
            words
                .replace_all(s, |c: &Captures| {
                    format!(
                        r#"</lang><lang xml:lang="{other_language}">{}</lang><lang xml:lang="{language}">"#,
                        &c[0]
                    )
                })
                .into_owned()
        });

        let wrapped = if text.starts_with("<lang xml:lang=") {
            text
        } else {
            format!(r#"<lang xml:lang="{language}">{text}</lang>"#)
        };
        let trimmed = EMPTY_LANG.replace_all(&wrapped, "");
        if trimmed.is_empty() {
            wrapped
        } else {
            trimmed.into_owned()
        }
    }

    fn date_markup(&self, raw: &str) -> Option<String> {
        let parts: Vec<&str> = raw.split(['.', '-']).collect();
        let [a, b, c] = parts.as_slice() else {
            return None;
        };
        let (year, month, day) = if a.len() == 4 {
            (a.parse::<i32>().ok()?, b.parse().ok()?, c.parse().ok()?)
        } else {
            let year: i32 = match c.len() {
                2 => 2000 + c.parse::<i32>().ok()?,
                4 => c.parse().ok()?,
                _ => return None,
            };
            (year, b.parse().ok()?, a.parse().ok()?)
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(if year == self.current_year {
            format!(
                r#"<say-as interpret-as="date" format="dm">{}-{}</say-as>"#,
                date.format("%-d"),
                date.format("%-m")
            )
        } else {
            format!(
                r#"<say-as interpret-as="date" format="dmy">{}-{}-{}</say-as>"#,
                date.format("%-d"),
                date.format("%-m"),
                year
            )
        })
    }
}

fn marked_time(c: &Captures) -> Option<String> {
    let hour: u32 = c[1].parse().ok()?;
    let minute: u32 = c[2].parse().ok()?;
    if minute > 59 {
        return None;
    }
    let marker = c[3].to_lowercase();
    let spoken = if marker == "uhr" {
        if hour > 23 {
            return None;
        }
        if minute == 0 {
            format!("{hour} Uhr")
        } else {
            format!("{hour} Uhr {minute}")
        }
    } else {
        if !(1..=12).contains(&hour) {
            return None;
        }
        let hour24 = match (marker.as_str(), hour) {
            ("pm", h) if h < 12 => h + 12,
            ("am", 12) => 0,
            (_, h) => h,
        };
        let suffix = if hour24 >= 12 { "PM" } else { "AM" };
        let display = if hour24 % 12 == 0 { 12 } else { hour24 % 12 };
        format!("{display}:{minute:02} {suffix}")
    };
    Some(format!(r#"<say-as interpret-as="time">{spoken}</say-as>"#))
}

fn plain_time(c: &Captures) -> Option<String> {
    let hour: u32 = c[1].parse().ok()?;
    let minute: u32 = c[2].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    let spoken = if minute == 0 {
        hour.to_string()
    } else {
        format!("{hour} {minute}")
    };
    Some(format!(r#"<say-as interpret-as="time">{spoken}</say-as>"#))
}

fn spell_email(user: &str, domain_tld: &str, english: bool) -> String {
    let (dot, dash) = if english { ("dot", "dash") } else { ("Punkt", "Minus") };
    let speak = |s: &str| {
        s.replace('.', &format!(" {dot} "))
            .replace('-', &format!(" {dash} "))
    };
    match domain_tld.rsplit_once('.') {
        Some((domain, tld)) => format!(
            r#"{} @ {} {dot} <say-as interpret-as="characters">{tld}</say-as>"#,
            speak(user),
            speak(domain)
        ),
        None => format!("{} @ {}", speak(user), speak(domain_tld)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> SpeechFormatter {
        SpeechFormatter::new(2024)
    }

    #[test]
    fn test_time_and_date_markup_is_idempotent() {
        let f = formatter();
        let once = f.format("Meeting at 14:30 on 2024-12-05", "en-US");
        assert_eq!(
            once,
            r#"<lang xml:lang="en-US">Meeting at <say-as interpret-as="time">14 30</say-as> on <say-as interpret-as="date" format="dm">5-12</say-as></lang>"#
        );
        assert_eq!(f.format(&once, "en-US"), once);
    }

    #[test]
    fn test_other_year_keeps_year() {
        let out = formatter().format("Anreise am 05.01.25", "de-DE");
        assert!(out.contains(r#"<say-as interpret-as="date" format="dmy">5-1-2025</say-as>"#));
    }

    #[test]
    fn test_invalid_date_left_alone() {
        let out = formatter().format("Code 31.02.2024", "de-DE");
        assert!(out.contains("31.02.2024"));
    }

    #[test]
    fn test_marked_times() {
        let f = formatter();
        assert!(f
            .format("Frühstück bis 10:30 Uhr", "de-DE")
            .contains(r#"<say-as interpret-as="time">10 Uhr 30</say-as>"#));
        assert!(f
            .format("Checkout until 11:00 am", "en-US")
            .contains(r#"<say-as interpret-as="time">11:00 AM</say-as>"#));
        assert!(f
            .format("Bar opens 7.15 pm", "en-US")
            .contains(r#"<say-as interpret-as="time">7:15 PM</say-as>"#));
    }

    #[test]
    fn test_digits_ampersand_and_brand() {
        let out = formatter().format("Ruf 0891234567 an & besuche sleepinroomz", "de-DE");
        assert!(out.contains(r#"<say-as interpret-as="digits">0891234567</say-as>"#));
        assert!(out.contains(" und besuche sleep in roomz "));
    }

    #[test]
    fn test_email_is_spelled() {
        let out = formatter().format("Schreib an front-desk@hotel.de", "de-DE");
        assert!(out.contains(r#"front Minus desk @ hotel Punkt <say-as interpret-as="characters">de</say-as>"#));
    }

    #[test]
    fn test_foreign_words_switch_language() {
        let f = formatter();
        let out = f.format("Hi, wir haben Suites", "de-DE");
        assert_eq!(
            out,
            r#"<lang xml:lang="en-US">Hi</lang><lang xml:lang="de-DE">, wir haben </lang><lang xml:lang="en-US">Suites</lang>"#
        );
        assert_eq!(f.format(&out, "de-DE"), out);
        assert!(!EMPTY_LANG.is_match(&out));
    }

    #[test]
    fn test_foreign_word_mid_sentence_keeps_surrounding_text() {
        let out = formatter().format("Wir bieten Late Checkout an", "de-DE");
        assert_eq!(
            out,
            r#"<lang xml:lang="de-DE">Wir bieten </lang><lang xml:lang="en-US">Late</lang><lang xml:lang="de-DE"> Checkout an</lang>"#
        );
        assert!(!EMPTY_LANG.is_match(&out));
    }

    #[test]
    fn test_empty_text_stays_wrapped() {
        assert_eq!(formatter().format("", "de-DE"), r#"<lang xml:lang="de-DE"></lang>"#);
    }

    #[test]
    fn test_existing_markup_untouched() {
        let out = formatter().format(r#"<break time="200ms"/>Hallo 12345"#, "de-DE");
        assert!(out.starts_with(r#"<lang xml:lang="de-DE"><break time="200ms"/>Hallo"#));
    }

    #[test]
    fn test_emoji_removed() {
        assert_eq!(strip_emoji("Gern 😊 geschehen ☀"), "Gern  geschehen ");
    }

    #[test]
    fn test_prosody() {
        assert_eq!(prosody("x", "medium"), r#"<prosody rate="medium">x</prosody>"#);
    }
}
