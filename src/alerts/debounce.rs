//! Re-alert suppression

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::config::Status;
use crate::state::AlertState;

/// What to do with a check's alert state after evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Healthy; delete any state
    Clear,
    /// First failure; create state and notify
    Alert,
    /// Still failing past the window; notify and advance the timer
    Realert,
    /// Still failing inside the window
    Suppress { next_alert_at: DateTime<Utc> },
}

/// Decide from the current status, existing state, and elapsed time
pub fn decide(
    status: Status,
    state: Option<&AlertState>,
    debounce: Duration,
    now: DateTime<Utc>,
) -> Decision {
    match (status, state) {
        (Status::Healthy, _) => Decision::Clear,
        (Status::Unhealthy, None) => Decision::Alert,
        (Status::Unhealthy, Some(state)) => {
            // A clock that moved backwards keeps the alert suppressed
            let elapsed = now.signed_duration_since(state.last_alert_time);
            let due = elapsed.to_std().map(|e| e >= debounce).unwrap_or(false);

            if due {
                Decision::Realert
            } else {
                let next_alert_at = chrono::Duration::from_std(debounce)
                    .ok()
                    .and_then(|window| state.last_alert_time.checked_add_signed(window))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                Decision::Suppress { next_alert_at }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(3600);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_healthy_always_clears() {
        let state = AlertState::new("web", t0());
        assert_eq!(decide(Status::Healthy, None, HOUR, t0()), Decision::Clear);
        assert_eq!(decide(Status::Healthy, Some(&state), HOUR, t0()), Decision::Clear);
    }

    #[test]
    fn test_first_failure_alerts() {
        assert_eq!(decide(Status::Unhealthy, None, HOUR, t0()), Decision::Alert);
    }

    #[test]
    fn test_window_boundaries() {
        let state = AlertState::new("web", t0());

        let inside = t0() + chrono::Duration::minutes(59);
        assert_eq!(
            decide(Status::Unhealthy, Some(&state), HOUR, inside),
            Decision::Suppress {
                next_alert_at: t0() + chrono::Duration::hours(1)
            }
        );

        let at = t0() + chrono::Duration::hours(1);
        assert_eq!(decide(Status::Unhealthy, Some(&state), HOUR, at), Decision::Realert);

        let after = t0() + chrono::Duration::hours(5);
        assert_eq!(decide(Status::Unhealthy, Some(&state), HOUR, after), Decision::Realert);
    }

    #[test]
    fn test_clock_moved_backwards_suppresses() {
        let state = AlertState::new("web", t0());
        let earlier = t0() - chrono::Duration::minutes(10);
        assert!(matches!(
            decide(Status::Unhealthy, Some(&state), HOUR, earlier),
            Decision::Suppress { .. }
        ));
    }

    #[test]
    fn test_zero_debounce_realerts_every_time() {
        let state = AlertState::new("web", t0());
        assert_eq!(
            decide(Status::Unhealthy, Some(&state), Duration::ZERO, t0()),
            Decision::Realert
        );
    }
}
