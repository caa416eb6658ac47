use chrono::{Locale, NaiveDate};
use pure_rust_locales::locale_match;
use serde_json::{json, Value as Json};
use tracing::debug;

/// Locales queued for the client. Sent locales stay in the list so they are not sent twice.
#[derive(Debug)]
pub(crate) struct LocaleQueue {
    locales: Vec<String>,
    pending: usize,
}

impl LocaleQueue {
    /// a queue holding only the session locale
    pub(crate) fn new(session_locale: &str) -> Self {
        LocaleQueue {
            locales: vec![session_locale.to_string()],
            pending: 0,
        }
    }

    /// forgets what was sent, the session locale is sent again
    pub(crate) fn reset(&mut self, session_locale: &str) {
        *self = LocaleQueue::new(session_locale);
    }

    pub(crate) fn require(&mut self, locale: &str) {
        if !self.locales.iter().any(|l| l == locale) {
            self.locales.push(locale.to_string());
        }
    }

    /// the declarations of the locales not sent yet
    pub(crate) fn drain(&mut self) -> Vec<Json> {
        let declarations = self.locales[self.pending..]
            .iter()
            .map(|locale| locale_declaration(locale))
            .collect();
        self.pending = self.locales.len();
        declarations
    }
}

/// first day of week (0 is sunday) and the short date and time patterns of a locale
struct LocaleFormat {
    first_day_of_week: u8,
    date: String,
    time: String,
}

impl LocaleFormat {
    fn from_pattern(first_day_of_week: u8, pattern: &str) -> Self {
        let (date, time) = split_pattern(pattern);
        LocaleFormat {
            first_day_of_week,
            date: date.to_string(),
            time: time.to_string(),
        }
    }
}

/// The locale data bundled with chrono. Accepts `de_DE`, `de-DE` and a bare language when
/// the language has a locale of the same country code.
fn chrono_locale(locale: &str) -> Option<Locale> {
    let name = locale.replace('-', "_");
    Locale::try_from(name.as_str()).ok().or_else(|| {
        let language = name.split('_').next().unwrap_or_default().to_ascii_lowercase();
        let full = format!("{}_{}", language, language.to_ascii_uppercase());
        Locale::try_from(full.as_str()).ok()
    })
}

/// Short patterns for locales whose client formats differ from the C library ones.
fn known_format(locale: &str) -> Option<LocaleFormat> {
    let mut parts = locale.split(|c| c == '_' || c == '-');
    let language = parts.next().unwrap_or_default().to_ascii_lowercase();
    let country = parts.next().unwrap_or_default().to_ascii_uppercase();
    let (first_day_of_week, pattern) = match (language.as_str(), country.as_str()) {
        ("en", "US") | ("en", "") => (0, "M/d/yy h:mm a"),
        ("en", "GB") | ("en", "IE") => (1, "dd/MM/yy HH:mm"),
        ("en", "CA") => (0, "dd/MM/yy h:mm a"),
        ("en", "AU") => (1, "d/MM/yy h:mm a"),
        ("de", _) => (1, "dd.MM.yy HH:mm"),
        ("fi", _) => (1, "d.M.yyyy H.mm"),
        ("fr", "CA") => (0, "yy-MM-dd HH:mm"),
        ("fr", _) => (1, "dd/MM/yy HH:mm"),
        ("sv", _) => (1, "yyyy-MM-dd HH:mm"),
        ("nl", _) => (1, "d-M-yy H:mm"),
        ("it", _) => (1, "dd/MM/yy H.mm"),
        ("es", _) => (1, "d/MM/yy H:mm"),
        ("ja", _) => (0, "yy/MM/dd H:mm"),
        ("zh", _) => (0, "yy-M-d ah:mm"),
        ("ko", _) => (0, "yy. M. d a h:mm"),
        _ => return None,
    };
    Some(LocaleFormat::from_pattern(first_day_of_week, pattern))
}

/// Rewrites a strftime pattern as the date pattern syntax of the client. Seconds are dropped,
/// the client only shows hours and minutes.
fn client_pattern(strftime: &str, ampm: &str) -> String {
    let mut out = String::new();
    let mut chars = strftime.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('d') => out.push_str("dd"),
            Some('e') => out.push('d'),
            Some('m') => out.push_str("MM"),
            Some('b') | Some('h') => out.push_str("MMM"),
            Some('y') => out.push_str("yy"),
            Some('Y') => out.push_str("yyyy"),
            Some('D') => out.push_str("MM/dd/yy"),
            Some('F') => out.push_str("yyyy-MM-dd"),
            Some('H') => out.push_str("HH"),
            Some('k') => out.push('H'),
            Some('I') => out.push_str("hh"),
            Some('l') => out.push('h'),
            Some('M') => out.push_str("mm"),
            Some('R') | Some('T') => out.push_str("HH:mm"),
            Some('r') => out.push_str(&client_pattern(ampm, ampm)),
            Some('p') | Some('P') => out.push('a'),
            Some('%') => out.push('%'),
            Some('S') => {
                let trimmed = out.trim_end_matches(|c: char| c == ':' || c == '.').len();
                out.truncate(trimmed);
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

fn library_format(locale: Locale) -> LocaleFormat {
    let ampm = locale_match!(locale => LC_TIME::T_FMT_AMPM);
    LocaleFormat {
        first_day_of_week: 0,
        date: client_pattern(locale_match!(locale => LC_TIME::D_FMT), ampm),
        time: client_pattern(locale_match!(locale => LC_TIME::T_FMT), ampm),
    }
}

fn locale_format(locale: &str, data: Option<Locale>) -> LocaleFormat {
    known_format(locale)
        .or_else(|| data.map(library_format))
        .unwrap_or_else(|| LocaleFormat::from_pattern(0, "M/d/yy h:mm a"))
}

fn month_names(format: &str, locale: Locale) -> Vec<String> {
    (1..=12)
        .filter_map(|month| NaiveDate::from_ymd_opt(2006, month, 1))
        .map(|date| date.format_localized(format, locale).to_string())
        .collect()
}

fn day_names(format: &str, locale: Locale) -> Vec<String> {
    // 2006-01-01 was a sunday
    (1..=7)
        .filter_map(|day| NaiveDate::from_ymd_opt(2006, 1, day))
        .map(|date| date.format_localized(format, locale).to_string())
        .collect()
}

fn am_pm(locale: Locale) -> [String; 2] {
    match locale_match!(locale => LC_TIME::AM_PM) {
        [am, pm] if !am.is_empty() && !pm.is_empty() => [am.to_string(), pm.to_string()],
        _ => ["AM".to_string(), "PM".to_string()],
    }
}

/// Splits a short date time pattern into its date part and its time part. Some locales put
/// the time first, some the am/pm marker before the hours.
fn split_pattern(pattern: &str) -> (&str, &str) {
    let mut time_start = pattern
        .find('H')
        .or_else(|| pattern.find('h'))
        .unwrap_or(pattern.len());
    if let Some(ampm) = pattern.find('a') {
        if ampm > 0 && ampm < time_start {
            time_start = ampm;
        }
    }
    if time_start == 0 {
        let mut date_start = pattern.find(' ').unwrap_or(0);
        if let Some(ampm) = pattern.find('a') {
            if ampm > date_start {
                date_start = pattern[ampm..].find(' ').map_or(date_start, |i| ampm + i);
            }
        }
        let date = pattern.get(date_start + 1..).unwrap_or_default();
        (date.trim(), &pattern[..date_start])
    } else {
        let date = &pattern[..time_start.saturating_sub(1)];
        (date.trim(), &pattern[time_start..])
    }
}

/// The data the client needs to format dates and times in `locale`. Names come from the
/// locale data bundled with chrono, unknown locales get the `en_US` names.
pub(crate) fn locale_declaration(locale: &str) -> Json {
    let data = chrono_locale(locale);
    let format = locale_format(locale, data);
    let names = data.unwrap_or(Locale::en_US);
    let twelve_hour_clock = format.time.contains('a');
    let hour_minute_delimiter = if format.time.contains('.') { "." } else { ":" };
    debug!("sending locale data for {}", locale);

    let mut declaration = json!({
        "name": locale,
        "smn": month_names("%b", names),
        "mn": month_names("%B", names),
        "sdn": day_names("%a", names),
        "dn": day_names("%A", names),
        "fdow": format.first_day_of_week,
        "df": format.date,
        "thc": twelve_hour_clock,
        "hmd": hour_minute_delimiter,
    });
    if twelve_hour_clock {
        declaration["ampm"] = json!(am_pm(names));
    }
    declaration
}
