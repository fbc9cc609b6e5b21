//! Google provider against a local HTTP fixture.

use chrono::{TimeZone, Utc};
use lunacal::calendar::google::GoogleCalendarProvider;
use lunacal::{CalendarProvider, DateWindow, Event, EventSource, ProviderError};
use serde_json::json;
use wiremock::matchers::{bearer_token, body_partial_json, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn provider(server: &MockServer) -> GoogleCalendarProvider {
    GoogleCalendarProvider::new("token-123", chrono_tz::Europe::Paris)
        .unwrap()
        .with_base_url(&format!("{}/calendar/v3", server.uri()))
        .unwrap()
}

#[tokio::test]
async fn test_fetch_follows_page_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/work/events"))
        .and(bearer_token("token-123"))
        .and(query_param("singleEvents", "false"))
        .and(query_param("timeMin", "2025-01-01T00:00:00Z"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "g-1",
                "summary": "Standup",
                "start": {"dateTime": "2025-01-06T09:00:00+01:00"},
                "end": {"dateTime": "2025-01-06T09:30:00+01:00"},
                "updated": "2025-01-02T08:00:00.000Z",
                "recurrence": ["RRULE:FREQ=WEEKLY;BYDAY=MO", "EXDATE;TZID=Europe/Paris:20250113T090000"]
            }],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/work/events"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "g-2", "status": "cancelled"},
                {
                    "id": "g-3",
                    "summary": "  ",
                    "start": {"date": "2025-01-10"},
                    "end": {"date": "2025-01-11"}
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let window = DateWindow::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
    );
    let events = provider(&server).await.fetch_events("work", Some(window)).await.unwrap();

    assert_eq!(events.len(), 2);
    let standup = &events[0];
    assert_eq!(standup.foreign_id, "g-1");
    assert_eq!(standup.start_time, Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap());
    assert_eq!(standup.recurrence_rule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
    assert_eq!(standup.excluded_dates, vec!["20250113T080000Z".to_string()]);
    assert_eq!(standup.updated, Some(Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap()));

    let all_day = &events[1];
    assert!(all_day.is_all_day);
    assert_eq!(all_day.title, "(No title)");
    assert!(all_day.updated.is_none());
}

#[tokio::test]
async fn test_calendar_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/v3/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "team", "summary": "Team"},
                {"id": "me", "summary": "Personal", "primary": true}
            ]
        })))
        .mount(&server)
        .await;

    let calendars = provider(&server).await.list_calendars().await.unwrap();
    assert_eq!(calendars.len(), 2);
    assert!(!calendars[0].is_primary);
    assert!(calendars[1].is_primary);
    assert_eq!(calendars[1].title, "Personal");
}

#[tokio::test]
async fn test_create_returns_the_new_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/work/events"))
        .and(body_partial_json(json!({
            "summary": "Dentist",
            "start": {"timeZone": "Europe/Paris"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "g-new"})))
        .expect(1)
        .mount(&server)
        .await;

    let event = Event::new(
        "Dentist",
        Utc.with_ymd_and_hms(2025, 3, 4, 14, 0, 0).unwrap(),
        EventSource::Google,
    );
    let id = provider(&server).await.create_event(&event, "work").await.unwrap();
    assert_eq!(id, "g-new");
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/busy/events"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/calendar/v3/calendars/work/events/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/broken/events"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "Bad timeMin"}
        })))
        .mount(&server)
        .await;

    let google = provider(&server).await;

    let throttled = google.fetch_events("busy", None).await.unwrap_err();
    assert!(matches!(throttled, ProviderError::RateLimited));

    let gone = google.delete_event(Some("work"), "gone").await.unwrap_err();
    assert!(gone.is_not_found());

    let broken = google.fetch_events("broken", None).await.unwrap_err();
    assert!(matches!(broken, ProviderError::Api(ref message) if message == "Bad timeMin"));
}
