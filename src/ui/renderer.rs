// Formatting helpers for the dashboard tables

use crate::types::AnalyticsEvent;
use chrono::{DateTime, Utc};

/// `0x1234…abcd` for long addresses, unchanged otherwise
///
/// Counts characters, not bytes; wallet strings from UI events are unvalidated.
pub fn short_address(address: &str) -> String {
    let len = address.chars().count();
    if len <= 12 {
        return address.to_string();
    }
    let head: String = address.chars().take(6).collect();
    let tail: String = address.chars().skip(len - 4).collect();
    format!("{}…{}", head, tail)
}

pub fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%H:%M:%S").to_string()
}

/// Time, kind, description and wallet columns for one event
pub fn event_row(event: &AnalyticsEvent) -> [String; 4] {
    let description = match event {
        AnalyticsEvent::Contract(e) => {
            format!("{} @ {}", e.event_name, short_address(&e.contract_address))
        }
        AnalyticsEvent::Ui(e) => match &e.url {
            Some(url) => format!("{} {}", e.event_type, url),
            None => e.event_type.to_string(),
        },
    };
    let wallet = event
        .wallet_address()
        .map(short_address)
        .unwrap_or_else(|| "-".to_string());

    [
        format_time(event.timestamp()),
        event.kind().to_string(),
        description,
        wallet,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, UiEvent};
    use chrono::TimeZone;

    #[test]
    fn test_short_address() {
        assert_eq!(short_address("0xabc"), "0xabc");
        let long = format!("0x{}", "1234567890".repeat(4));
        assert_eq!(short_address(&long), "0x1234…7890");
    }

    #[test]
    fn test_short_address_multibyte() {
        assert_eq!(short_address("0x123é5678901234"), "0x123é…1234");
        // Twelve characters but more than twelve bytes stays whole
        assert_eq!(short_address("ééééééééé0x1"), "ééééééééé0x1");
        assert_eq!(short_address("0xé"), "0xé");
    }

    #[test]
    fn test_ui_event_row() {
        let event = AnalyticsEvent::Ui(UiEvent {
            id: "e1".to_string(),
            event_type: EventType::PageView,
            wallet_address: None,
            session_id: None,
            url: Some("/swap".to_string()),
            referrer: None,
            element: None,
            action: None,
            value: None,
            metadata: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 7).unwrap(),
        });
        assert_eq!(
            event_row(&event),
            [
                "09:05:07".to_string(),
                "ui".to_string(),
                "PAGE_VIEW /swap".to_string(),
                "-".to_string()
            ]
        );
    }
}
