//! Pipeline runs against the in-memory store and scripted providers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use tripline_core::{
    Category, Email, EmailProcessingState, EmailRepository, PipelineStateRepository, ProviderKind,
    Stage, StageStatus, TripRepository,
};
use tripline_db::test_fixtures::{email_record, email_record_with_body};
use tripline_db::MemoryStore;
use tripline_inference::mock::{MockOutcome, MockProvider};
use tripline_inference::{FallbackChain, FallbackPolicy, Provider};
use tripline_jobs::{Pipeline, ResetTarget, RunnerConfig};
use tripline_trips::GroupingPolicy;

const SENT: &str = "Mon, 2 Jun 2025 08:00:00 +0000";

/// Answers classification prompts by subject keyword and booking prompts by
/// email id prefix.
fn respond(prompt: &str) -> MockOutcome {
    if prompt.contains("Emails to classify:") {
        let items: Vec<Value> = prompt
            .lines()
            .filter_map(|line| {
                let (number, rest) = line.split_once(". From: ")?;
                let id: u32 = number.trim().parse().ok()?;
                let subject = rest.split(" | Subject: ").nth(1).unwrap_or("");
                let category = if subject.contains("Flight") {
                    "flight"
                } else if subject.contains("Hotel") {
                    "hotel"
                } else {
                    "marketing"
                };
                Some(json!({"id": id, "category": category}))
            })
            .collect();
        return MockOutcome::Respond(Value::Array(items).to_string());
    }

    let id = prompt
        .lines()
        .find_map(|line| line.strip_prefix("- Email ID: "))
        .unwrap_or("");
    let response = if id.starts_with("flight") {
        json!({
            "booking_type": "flight",
            "status": "confirmed",
            "confirmation_numbers": ["LX7Q2"],
            "transport_segments": [{
                "segment_type": "flight",
                "carrier_name": "Swiss",
                "segment_number": "LX1234",
                "departure_location": "Zurich",
                "arrival_location": "Oslo",
                "departure_datetime": "2025-06-10T09:05:00",
                "arrival_datetime": null
            }],
            "cost_info": {"total_cost": 250.0, "currency": "CHF"}
        })
        .to_string()
    } else if id.starts_with("hotel") {
        json!({
            "booking_type": "hotel",
            "status": "confirmed",
            "confirmation_numbers": ["H-88120"],
            "accommodations": [{
                "property_name": "Hotel Oslo",
                "city": "Oslo",
                "check_in_date": "2025-06-10",
                "check_out_date": "2025-06-14"
            }],
            "cost_info": {"total_cost": 600.0, "currency": "CHF"}
        })
        .to_string()
    } else if id.starts_with("broken") {
        "Sorry, I could not find any booking in this email.".to_string()
    } else {
        json!({
            "is_travel": true,
            "booking_type": null,
            "non_booking_type": "reminder",
            "reason": "check-in reminder"
        })
        .to_string()
    };
    MockOutcome::Respond(response)
}

fn chain(providers: Vec<Provider>) -> FallbackChain {
    FallbackChain::new(providers)
        .with_policy(FallbackPolicy::default().with_retry_delay(Duration::ZERO))
}

fn pipeline(store: &Arc<MemoryStore>, providers: Vec<Provider>) -> Pipeline {
    Pipeline::new(
        store.repositories(),
        chain(providers),
        RunnerConfig::default(),
        GroupingPolicy::default(),
    )
}

fn scripted() -> MockProvider {
    MockProvider::new(ProviderKind::Gemini).with_responder(respond)
}

async fn email(store: &Arc<MemoryStore>, id: &str) -> Email {
    EmailRepository::get(store.as_ref(), id).await.unwrap().unwrap()
}

async fn state(store: &Arc<MemoryStore>, id: &str) -> EmailProcessingState {
    PipelineStateRepository::get(store.as_ref(), id)
        .await
        .unwrap()
        .unwrap()
}

async fn ingest(pipeline: &Pipeline, ids_and_subjects: &[(&str, &str)]) {
    let records: Vec<_> = ids_and_subjects
        .iter()
        .map(|(id, subject)| email_record_with_body(id, subject, SENT, "Booking details inside."))
        .collect();
    pipeline.ingest(&records).await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_run_produces_trip() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, vec![Provider::custom(scripted())]);
    ingest(
        &pipeline,
        &[
            ("flight", "Your Flight to Oslo"),
            ("hotel", "Hotel reservation confirmed"),
            ("promo", "Summer deals"),
        ],
    )
    .await;

    let report = pipeline.run(&Stage::ALL).await.unwrap();
    assert!(!report.stopped);
    assert_eq!(report.stage(Stage::Classification).unwrap().completed, 3);
    assert_eq!(report.stage(Stage::ContentExtraction).unwrap().completed, 2);
    assert_eq!(report.stage(Stage::BookingExtraction).unwrap().completed, 2);
    assert_eq!(report.stage(Stage::TripDetection).unwrap().completed, 2);
    // one classification call and two booking calls
    assert_eq!(report.usage["gemini:fast"].calls, 3);

    let promo = email(&store, "promo").await;
    assert_eq!(promo.classification, Some(Category::Marketing));

    let trips = store.list_trips().await.unwrap();
    assert_eq!(trips.len(), 1);
    let trip = &trips[0].trip;
    assert_eq!(trip.origin_city, "Zurich");
    assert_eq!(trip.cities_visited, vec!["Oslo".to_string()]);
    assert_eq!(trip.total_cost, 850.0);
    assert_eq!(trips[0].email_ids(), vec!["flight".to_string(), "hotel".to_string()]);

    let status = pipeline.status_report().await.unwrap();
    assert_eq!(status.emails, 3);
    assert_eq!(status.trips, 1);
    assert_eq!(status.stages[&Stage::TripDetection].completed, 2);
}

#[tokio::test]
async fn test_transient_primary_falls_back_to_next_provider() {
    let store = MemoryStore::new();
    let primary = MockProvider::new(ProviderKind::Gemini)
        .then_transient("rate limited")
        .then_transient("rate limited");
    let secondary = MockProvider::new(ProviderKind::OpenAi).with_responder(respond);
    let pipeline = pipeline(
        &store,
        vec![
            Provider::custom(primary.clone()),
            Provider::custom(secondary.clone()),
        ],
    );
    ingest(&pipeline, &[("flight", "Your Flight to Oslo")]).await;

    let report = pipeline.run(&[Stage::Classification]).await.unwrap();

    assert_eq!(primary.call_count(), 2);
    assert_eq!(secondary.call_count(), 1);
    assert!(!report.usage.contains_key("gemini:fast"));
    let served = &report.usage["openai:fast"];
    assert_eq!(served.calls, 1);
    assert_eq!(served.fallbacks, 1);

    let email = email(&store, "flight").await;
    assert_eq!(email.classification, Some(Category::Flight));
}

#[tokio::test]
async fn test_concurrent_runs_claim_each_email_once() {
    let store = MemoryStore::new();
    let provider = scripted();
    let pipeline = Pipeline::new(
        store.repositories(),
        chain(vec![Provider::custom(provider.clone())]),
        RunnerConfig::default().with_batch_size(2).with_max_parallel(2),
        GroupingPolicy::default(),
    );
    let emails: Vec<(String, &str)> = (0..6)
        .map(|i| (format!("flight-{}", i), "Your Flight"))
        .collect();
    let refs: Vec<(&str, &str)> = emails.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    ingest(&pipeline, &refs).await;
    pipeline.run(&[Stage::Classification]).await.unwrap();

    let other = pipeline.clone();
    let (a, b) = tokio::join!(
        pipeline.run(&[Stage::BookingExtraction]),
        other.run(&[Stage::BookingExtraction])
    );
    let completed = a.unwrap().stage(Stage::BookingExtraction).unwrap().completed
        + b.unwrap().stage(Stage::BookingExtraction).unwrap().completed;
    assert_eq!(completed, 6);

    let booking_calls = provider
        .calls()
        .iter()
        .filter(|c| c.prompt.starts_with("Extract the travel booking"))
        .count();
    assert_eq!(booking_calls, 6);
}

#[tokio::test]
async fn test_failed_email_does_not_abort_slice() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, vec![Provider::custom(scripted())]);
    ingest(
        &pipeline,
        &[("flight", "Your Flight to Oslo"), ("broken", "Flight changed")],
    )
    .await;

    let report = pipeline
        .run(&[Stage::Classification, Stage::BookingExtraction])
        .await
        .unwrap();
    let booking = report.stage(Stage::BookingExtraction).unwrap();
    assert_eq!(booking.completed, 1);
    assert_eq!(booking.failed, 1);

    let failed_state = state(&store, "broken").await;
    assert_eq!(failed_state.booking_extraction_status, StageStatus::Failed);
    let error = failed_state.booking_extraction_error.unwrap();
    assert!(error.contains("could not find any booking"), "{}", error);

    let failed = store
        .list_by_status(Stage::BookingExtraction, StageStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed, vec!["broken".to_string()]);

    let reset = pipeline
        .reset(Stage::BookingExtraction, ResetTarget::Failed)
        .await
        .unwrap();
    assert_eq!(reset, 1);
    let after_reset = state(&store, "broken").await;
    assert_eq!(after_reset.booking_extraction_status, StageStatus::Pending);
    assert!(after_reset.booking_extraction_error.is_none());
}

#[tokio::test]
async fn test_non_booking_answer_is_completed() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, vec![Provider::custom(scripted())]);
    ingest(&pipeline, &[("reminder", "Flight check-in opens")]).await;

    let report = pipeline
        .run(&[Stage::Classification, Stage::BookingExtraction, Stage::TripDetection])
        .await
        .unwrap();
    assert_eq!(report.stage(Stage::BookingExtraction).unwrap().completed, 1);
    assert_eq!(report.stage(Stage::TripDetection).unwrap().completed, 1);
    assert!(store.list_trips().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_booking_reset_leaves_other_stages_untouched() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, vec![Provider::custom(scripted())]);
    ingest(&pipeline, &[("flight", "Your Flight to Oslo")]).await;
    pipeline.run(&Stage::ALL).await.unwrap();

    let reset = pipeline
        .reset(
            Stage::BookingExtraction,
            ResetTarget::Ids(vec!["flight".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(reset, 1);

    let state = state(&store, "flight").await;
    assert_eq!(state.booking_extraction_status, StageStatus::Pending);
    assert!(state.booking_info().is_none());
    assert!(state.booking_extraction_error.is_none());
    assert_eq!(state.classification_status, StageStatus::Completed);
    assert_eq!(state.extraction_status, StageStatus::Completed);
    assert_eq!(state.trip_detection_status, StageStatus::Completed);

    let email = email(&store, "flight").await;
    assert_eq!(email.classification, Some(Category::Flight));
}

#[tokio::test]
async fn test_email_without_body_uses_subject_for_booking() {
    let store = MemoryStore::new();
    let provider = scripted();
    let pipeline = pipeline(&store, vec![Provider::custom(provider.clone())]);
    pipeline
        .ingest(&[email_record("flight", "Your Flight LX1234 to Oslo")])
        .await
        .unwrap();

    let report = pipeline
        .run(&[
            Stage::Classification,
            Stage::ContentExtraction,
            Stage::BookingExtraction,
        ])
        .await
        .unwrap();
    assert_eq!(report.stage(Stage::ContentExtraction).unwrap().failed, 1);
    assert_eq!(report.stage(Stage::BookingExtraction).unwrap().completed, 1);

    let state = state(&store, "flight").await;
    assert_eq!(
        state.extraction_error.as_deref(),
        Some("email has no raw content")
    );
    let prompt = provider
        .calls()
        .into_iter()
        .map(|c| c.prompt)
        .find(|p| p.starts_with("Extract the travel booking"))
        .unwrap();
    assert!(prompt.contains("Full Email Content:\nYour Flight LX1234 to Oslo"));
}

#[tokio::test]
async fn test_unavailable_store_aborts_run() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, vec![Provider::custom(scripted())]);
    ingest(&pipeline, &[("flight", "Your Flight to Oslo")]).await;
    store.set_unavailable(true).await;

    let err = pipeline.run(&[Stage::Classification]).await.unwrap_err();
    assert!(err.is_infrastructure());
}

#[tokio::test]
async fn test_stop_request_prevents_new_slices() {
    let store = MemoryStore::new();
    let provider = scripted();
    let pipeline = pipeline(&store, vec![Provider::custom(provider.clone())]);
    ingest(&pipeline, &[("flight", "Your Flight to Oslo")]).await;

    pipeline.handle().cancel();
    let report = pipeline.run(&Stage::ALL).await.unwrap();

    assert!(report.stopped);
    assert_eq!(report.stages.len(), 1);
    assert_eq!(provider.call_count(), 0);
    let counts = store.status_counts(Stage::Classification).await.unwrap();
    assert_eq!(counts.pending, 1);
}

#[tokio::test]
async fn test_ai_stage_without_providers_is_config_error() {
    let store = MemoryStore::new();
    let pipeline = pipeline(&store, Vec::new());
    ingest(&pipeline, &[("flight", "Your Flight to Oslo")]).await;

    let err = pipeline.run(&[Stage::Classification]).await.unwrap_err();
    assert!(matches!(err, tripline_core::Error::Config(_)));

    // Content extraction needs no provider.
    let report = pipeline.run(&[Stage::ContentExtraction]).await.unwrap();
    assert_eq!(report.stage(Stage::ContentExtraction).unwrap().claimed, 0);
}
