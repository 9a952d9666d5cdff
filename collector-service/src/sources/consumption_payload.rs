use consumption_core::{Fluid, RawReading};
use serde::Deserialize;
use serde_json::Value;
use time::{macros::format_description, Date};

/// Body of the portal's `/local/{id}/conso/{fluid}` response.
///
/// `consommations` holds cumulative month-to-date values, one per reported
/// day. Only the latest entry is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumptionPayload {
    #[serde(default)]
    pub unite: Option<String>,
    #[serde(default)]
    pub consommations: Vec<ConsumptionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumptionEntry {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub valeur: Option<Value>,
    #[serde(default, rename = "fuiteEstimee")]
    pub fuite_estimee: Option<Value>,
}

/// Decodes one payload into a reading. Never fails: whatever cannot be
/// decoded is left as `None` for the engine to flag.
pub fn decode_reading(fluid: Fluid, payload: &ConsumptionPayload) -> RawReading {
    let Some(latest) = payload
        .consommations
        .iter()
        .max_by(|a, b| a.date.as_deref().unwrap_or("").cmp(b.date.as_deref().unwrap_or("")))
    else {
        return RawReading::empty(fluid);
    };

    let factor = if payload.unite.as_deref() == Some("m3") { 1000.0 } else { 1.0 };
    let total = latest
        .valeur
        .as_ref()
        .and_then(parse_number)
        .map(|v| ((v * factor) * 1000.0).round() / 1000.0);

    let leak_estimate = if fluid.is_water() {
        latest.fuite_estimee.as_ref().and_then(leak_text)
    } else {
        None
    };

    let mut reading = RawReading::empty(fluid);
    reading.reported_date = latest.date.as_deref().and_then(parse_portal_date);
    reading.total = total;
    if let Some(leak) = leak_estimate {
        reading = reading.with_leak_estimate(leak);
    }
    reading
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` and timestamps starting with it.
pub fn parse_portal_date(raw: &str) -> Option<Date> {
    let day = raw.trim().get(..10)?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

fn leak_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
