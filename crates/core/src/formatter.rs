//! Renders source records into the canonical text that gets embedded.
//!
//! Each [`EntityType`] maps to one template. Types without a registered
//! template fall through to the fallback, which prints the record as JSON, so
//! formatting never fails.

use crate::models::{EntityType, SourceRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type FormatFn = Arc<dyn Fn(&SourceRecord) -> String + Send + Sync>;

#[derive(Clone)]
pub struct ContentFormatter {
    templates: HashMap<EntityType, FormatFn>,
    fallback: FormatFn,
}

impl ContentFormatter {
    /// Registry with no templates; everything goes through `fallback`.
    pub fn with_fallback(fallback: FormatFn) -> Self {
        Self {
            templates: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, entity: EntityType, template: FormatFn) -> &mut Self {
        self.templates.insert(entity, template);
        self
    }

    pub fn has_template(&self, entity: &EntityType) -> bool {
        self.templates.contains_key(entity)
    }

    pub fn format(&self, entity: &EntityType, record: &SourceRecord) -> String {
        match self.templates.get(entity) {
            Some(template) => template(record),
            None => (self.fallback)(record),
        }
    }
}

impl Default for ContentFormatter {
    fn default() -> Self {
        let mut formatter = Self::with_fallback(Arc::new(format_generic));
        formatter
            .register(EntityType::CarRental, Arc::new(format_car_rental))
            .register(EntityType::Excursion, Arc::new(format_excursion))
            .register(EntityType::Flight, Arc::new(format_flight))
            .register(EntityType::Hotel, Arc::new(format_hotel))
            .register(EntityType::Faq, Arc::new(format_faq));
        formatter
    }
}

impl fmt::Debug for ContentFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFormatter")
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

pub fn format_car_rental(record: &SourceRecord) -> String {
    format!(
        "Car rental: {}, located at: {}, price tier: {}. \
         Rental period starts on {} and ends on {}. \
         Currently, the rental is: {}.",
        field(record, "name"),
        field(record, "location"),
        field(record, "price_tier"),
        field(record, "start_date"),
        field(record, "end_date"),
        booking_status(record),
    )
}

pub fn format_excursion(record: &SourceRecord) -> String {
    format!(
        "Excursion: {} at {}. Additional details: {}. \
         Currently, the excursion is {}. Keywords: {}.",
        field(record, "name"),
        field(record, "location"),
        field(record, "details"),
        booking_status(record),
        field(record, "keywords"),
    )
}

pub fn format_flight(record: &SourceRecord) -> String {
    format!(
        "Flight {} from {} to {} was scheduled to depart at {} and arrive at {}. \
         The actual departure was at {} and the actual arrival was at {}. \
         Currently, the flight status is '{}' and it was operated with aircraft code {}.",
        field(record, "flight_no"),
        field(record, "departure_airport"),
        field(record, "arrival_airport"),
        field(record, "scheduled_departure"),
        field(record, "scheduled_arrival"),
        field(record, "actual_departure"),
        field(record, "actual_arrival"),
        field(record, "status"),
        field(record, "aircraft_code"),
    )
}

pub fn format_hotel(record: &SourceRecord) -> String {
    format!(
        "Hotel {} located in {} is categorized as {} tier. \
         The check-in date is {} and the check-out date is {}. \
         Currently, the booked status is: {}.",
        field(record, "name"),
        field(record, "location"),
        field(record, "price_tier"),
        field(record, "checkin_date"),
        field(record, "checkout_date"),
        booking_status(record),
    )
}

pub fn format_faq(record: &SourceRecord) -> String {
    field(record, "page_content")
}

pub fn format_generic(record: &SourceRecord) -> String {
    Value::Object(record.fields().clone()).to_string()
}

fn field(record: &SourceRecord, name: &str) -> String {
    match record.get(name) {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(other) => other.to_string(),
    }
}

fn booking_status(record: &SourceRecord) -> &'static str {
    if record.get("booked").is_some_and(is_truthy) {
        "booked"
    } else {
        "not booked"
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => {
            let text = text.trim();
            !text.is_empty() && text != "0" && !text.eq_ignore_ascii_case("false")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SourceRecord {
        match value {
            Value::Object(fields) => SourceRecord::new(fields),
            _ => SourceRecord::default(),
        }
    }

    #[test]
    fn flight_template_interpolates_route_and_status() {
        let flight = record(json!({
            "flight_id": 1185,
            "flight_no": "QR0051",
            "departure_airport": "BSL",
            "arrival_airport": "BKK",
            "scheduled_departure": "2024-05-10 12:30:00",
            "scheduled_arrival": "2024-05-10 23:55:00",
            "actual_departure": null,
            "actual_arrival": null,
            "status": "Scheduled",
            "aircraft_code": "319",
        }));

        let text = ContentFormatter::default().format(&EntityType::Flight, &flight);
        assert!(text.starts_with("Flight QR0051 from BSL to BKK"));
        assert!(text.contains("The actual departure was at None"));
        assert!(text.contains("status is 'Scheduled'"));
        assert!(text.contains("aircraft code 319."));
    }

    #[test]
    fn booking_status_follows_truthiness() {
        let formatter = ContentFormatter::default();
        let booked = record(json!({"name": "Hilton Basel", "location": "Basel", "booked": 1}));
        let free = record(json!({"name": "Hilton Basel", "location": "Basel", "booked": 0}));

        assert!(formatter
            .format(&EntityType::Hotel, &booked)
            .ends_with("the booked status is: booked."));
        assert!(formatter
            .format(&EntityType::Hotel, &free)
            .ends_with("the booked status is: not booked."));
    }

    #[test]
    fn faq_uses_page_content_verbatim() {
        let faq = record(json!({"page_content": "## Baggage\nOne bag is free."}));
        assert_eq!(
            ContentFormatter::default().format(&EntityType::Faq, &faq),
            "## Baggage\nOne bag is free."
        );
    }

    #[test]
    fn unknown_entity_falls_back_to_json() {
        let row = record(json!({"airport_code": "ZRH", "city": "Zurich"}));
        let text = ContentFormatter::default()
            .format(&EntityType::Other("airports_data".to_string()), &row);
        assert!(text.contains("\"airport_code\":\"ZRH\""));
        assert!(text.contains("\"city\":\"Zurich\""));
    }

    #[test]
    fn registered_template_overrides_default() {
        let mut formatter = ContentFormatter::default();
        formatter.register(
            EntityType::Hotel,
            Arc::new(|record: &SourceRecord| format!("hotel:{}", field(record, "name"))),
        );
        let hotel = record(json!({"name": "Grand"}));
        assert_eq!(formatter.format(&EntityType::Hotel, &hotel), "hotel:Grand");
    }
}
