use super::{AckOutcome, DeliveryAttempt, DeliveryState, DeliveryTag, DeliveryTracker};
use crate::utils::error::TrackerError;

fn attempt(tag: u64, redelivered: bool) -> DeliveryAttempt {
    DeliveryAttempt::new(format!("msg-{tag}"), DeliveryTag(tag), redelivered)
}

#[test]
fn test_tracker_full_lifecycle() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(1, false)).unwrap();
    assert_eq!(tracker.state(DeliveryTag(1)), Some(DeliveryState::Received));

    tracker.begin_processing(DeliveryTag(1)).unwrap();
    assert_eq!(tracker.state(DeliveryTag(1)), Some(DeliveryState::Processing));

    let done = tracker.resolve(DeliveryTag(1), AckOutcome::Ack).unwrap();
    assert_eq!(done.state, DeliveryState::Acked);
    assert_eq!(done.envelope_id, "msg-1");
    assert!(tracker.is_empty());
}

#[test]
fn test_tracker_records_redelivery_flag() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(1, false)).unwrap();
    tracker.receive(&attempt(2, true)).unwrap();
    assert_eq!(tracker.is_redelivered(DeliveryTag(1)), Ok(false));
    assert_eq!(tracker.is_redelivered(DeliveryTag(2)), Ok(true));
    assert_eq!(tracker.in_flight(), 2);
}

#[test]
fn test_tracker_rejects_duplicate_tag() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(5, false)).unwrap();
    assert_eq!(
        tracker.receive(&attempt(5, false)),
        Err(TrackerError::DuplicateTag(DeliveryTag(5)))
    );
}

#[test]
fn test_tracker_resolves_only_once() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(3, false)).unwrap();
    tracker.begin_processing(DeliveryTag(3)).unwrap();
    tracker.resolve(DeliveryTag(3), AckOutcome::NackRequeue).unwrap();
    assert_eq!(
        tracker
            .resolve(DeliveryTag(3), AckOutcome::Ack)
            .map(|t| t.state),
        Err(TrackerError::UnknownTag(DeliveryTag(3)))
    );
}

#[test]
fn test_tracker_requires_processing_before_resolve() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(9, false)).unwrap();
    let err = tracker
        .resolve(DeliveryTag(9), AckOutcome::NackDiscard)
        .unwrap_err();
    assert_eq!(
        err,
        TrackerError::InvalidTransition {
            tag: DeliveryTag(9),
            from: "received",
            to: "discarded",
        }
    );
    assert_eq!(tracker.state(DeliveryTag(9)), Some(DeliveryState::Received));
}

#[test]
fn test_tracker_rejects_double_processing() {
    let mut tracker = DeliveryTracker::new();
    tracker.receive(&attempt(4, false)).unwrap();
    tracker.begin_processing(DeliveryTag(4)).unwrap();
    assert!(matches!(
        tracker.begin_processing(DeliveryTag(4)),
        Err(TrackerError::InvalidTransition { .. })
    ));
}

#[test]
fn test_unknown_tag() {
    let mut tracker = DeliveryTracker::new();
    assert_eq!(
        tracker.begin_processing(DeliveryTag(42)),
        Err(TrackerError::UnknownTag(DeliveryTag(42)))
    );
    assert_eq!(
        tracker.is_redelivered(DeliveryTag(42)),
        Err(TrackerError::UnknownTag(DeliveryTag(42)))
    );
}

#[test]
fn test_outcome_terminal_states() {
    assert_eq!(AckOutcome::Ack.terminal_state(), DeliveryState::Acked);
    assert_eq!(AckOutcome::NackRequeue.terminal_state(), DeliveryState::Requeued);
    assert_eq!(AckOutcome::NackDiscard.terminal_state(), DeliveryState::Discarded);
    assert!(AckOutcome::NackDiscard.terminal_state().is_terminal());
    assert!(!DeliveryState::Processing.is_terminal());
}
