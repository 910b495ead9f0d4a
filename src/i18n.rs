/*
Simple i18n helper for user-facing messages.

This module provides:
- A tiny embedded translations store for EN/DE (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- A `t` convenience wrapper using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let msg = i18n::t("coupon.not_found");
    let msg_with = i18n::tr(Some("de"), "coupon.min_order", Some(&[("amount", "50.00")]));

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `en`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "en";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const EN_JSON: &str = r#"
{
  "coupon.not_found": "Coupon code not found",
  "coupon.code_required": "Coupon code is required",
  "coupon.amount_required": "Order amount or cart items required",
  "coupon.inactive": "Coupon is not active",
  "coupon.not_yet_valid": "Coupon is not valid yet",
  "coupon.expired": "Coupon has expired",
  "coupon.usage_limit": "Coupon usage limit reached",
  "coupon.min_order": "Minimum order amount of {amount} EUR not reached",
  "coupon.no_eligible_items": "Coupon does not apply to any item in the cart",
  "coupon.only_95_tier": "Voucher only valid for the 95€ voucher tier",
  "coupon.invalid_amount": "Prices and order amounts must be non-negative and at most {max} EUR",
  "coupon.invalid_request": "Invalid coupon request: {err}",
  "calendar.fetch.html": "The calendar URL returned an HTML page instead of calendar data. The link is probably behind a login or is a sharing page; use the public or secret iCal (.ics) export link.",
  "calendar.fetch.not_calendar": "The calendar URL did not return iCalendar data (no BEGIN:VCALENDAR). Check that the link points to an .ics export.",
  "calendar.fetch.status": "The calendar server answered with HTTP {status} after {attempts} attempts. Check that the link is still valid and publicly reachable.",
  "calendar.fetch.network": "The calendar server could not be reached after {attempts} attempts: {err}",
  "calendar.fetch.invalid_url": "Invalid calendar URL: {url}",
  "calendar.fetch.timeout": "The calendar server did not deliver the feed within {seconds} seconds. Try again later or check that the link is reachable.",
  "calendar.fetch.too_large": "The calendar feed is larger than {limit} bytes and was not imported.",
  "calendar.invalid_date": "Invalid date '{value}', expected YYYY-MM-DD",
  "calendar.source_required": "Provide either ICS text or a calendar URL"
}
"#;

const DE_JSON: &str = r#"
{
  "coupon.not_found": "Gutscheincode nicht gefunden",
  "coupon.code_required": "Gutscheincode fehlt",
  "coupon.amount_required": "Bestellbetrag oder Warenkorb erforderlich",
  "coupon.inactive": "Gutschein ist nicht aktiv",
  "coupon.not_yet_valid": "Gutschein ist noch nicht gültig",
  "coupon.expired": "Gutschein ist abgelaufen",
  "coupon.usage_limit": "Gutschein wurde bereits zu oft eingelöst",
  "coupon.min_order": "Mindestbestellwert von {amount} EUR nicht erreicht",
  "coupon.no_eligible_items": "Gutschein gilt für keinen Artikel im Warenkorb",
  "coupon.only_95_tier": "Gutschein nur für den 95€-Gutschein gültig",
  "coupon.invalid_amount": "Preise und Bestellbeträge müssen zwischen 0 und {max} EUR liegen",
  "coupon.invalid_request": "Ungültige Gutscheinanfrage: {err}",
  "calendar.fetch.html": "Die Kalender-URL liefert eine HTML-Seite statt Kalenderdaten. Vermutlich ist der Link passwortgeschützt oder eine Freigabeseite; bitte den öffentlichen oder geheimen iCal-Link (.ics) verwenden.",
  "calendar.fetch.not_calendar": "Die Kalender-URL liefert keine iCalendar-Daten (kein BEGIN:VCALENDAR). Bitte prüfen, ob der Link auf einen .ics-Export zeigt.",
  "calendar.fetch.status": "Der Kalenderserver antwortete nach {attempts} Versuchen mit HTTP {status}. Bitte prüfen, ob der Link noch gültig und öffentlich erreichbar ist.",
  "calendar.fetch.network": "Der Kalenderserver war nach {attempts} Versuchen nicht erreichbar: {err}",
  "calendar.fetch.invalid_url": "Ungültige Kalender-URL: {url}",
  "calendar.fetch.timeout": "Der Kalenderserver hat den Feed nicht innerhalb von {seconds} Sekunden geliefert. Bitte später erneut versuchen oder prüfen, ob der Link erreichbar ist.",
  "calendar.fetch.too_large": "Der Kalender-Feed ist größer als {limit} Bytes und wurde nicht importiert.",
  "calendar.invalid_date": "Ungültiges Datum '{value}', erwartet JJJJ-MM-TT",
  "calendar.source_required": "Bitte ICS-Text oder eine Kalender-URL angeben"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    let de_map: HashMap<String, String> = serde_json::from_str(DE_JSON).unwrap_or_else(|e| {
        panic!("failed to parse DE_JSON in i18n module: {}", e);
    });
    out.insert("de".to_string(), de_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "de-AT" -> "de").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has translations (e.g. "en", "de").
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Translate a key using an explicit language (or default if None).
///
/// Unsupported or regional tags are normalized first (`de-AT` -> `de`). Missing
/// keys fall back to the default language, then to the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang
        .map(normalize_language)
        .filter(|l| is_supported_language(l))
        .unwrap_or_else(|| DEFAULT_LANG.to_string());

    let val = map
        .get(desired.as_str())
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        // If still missing, return the key itself (useful in logs)
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Convenience wrapper with params (default language).
pub fn t_with(key: &str, params: &[(&str, &str)]) -> String {
    tr(None, key, Some(params))
}
