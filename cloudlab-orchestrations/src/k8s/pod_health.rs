//! Pod health classification
//!
//! Turns the partially observable state of a workload's pods into a single [`PodHealth`].
//! ContainerCreating is only a failure once it has lasted longer than the configured timeout.
//! The pod's creation timestamp gives its age on a single read; a [`PodHealthTracker`] kept
//! across observations covers pods the cluster reports without one.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
const CONTAINER_CREATING: &str = "ContainerCreating";
const IMAGE_PULL_FAILURES: [&str; 4] = [
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "ErrImageNeverPull",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PodHealth {
    Pending,
    Running,
    CrashLoopBackOff,
    ImagePullError,
    ContainerCreatingTimeout,
    Unknown,
}

impl PodHealth {
    /// Failures that will not resolve without a new command
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PodHealth::CrashLoopBackOff | PodHealth::ImagePullError | PodHealth::ContainerCreatingTimeout
        )
    }
}

impl fmt::Display for PodHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PodHealth::Pending => "Pending",
            PodHealth::Running => "Running",
            PodHealth::CrashLoopBackOff => "CrashLoopBackOff",
            PodHealth::ImagePullError => "ImagePullError",
            PodHealth::ContainerCreatingTimeout => "ContainerCreatingTimeout",
            PodHealth::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Remembers when each pod was first seen in ContainerCreating
#[derive(Debug, Clone)]
pub struct PodHealthTracker {
    timeout: Duration,
    first_creating: HashMap<String, Instant>,
}

impl PodHealthTracker {
    pub fn new(container_creating_timeout: Duration) -> Self {
        Self {
            timeout: container_creating_timeout,
            first_creating: HashMap::new(),
        }
    }

    /// Record a ContainerCreating observation; true once the pod has been creating too long,
    /// either by its age or by how long this tracker has watched it
    fn creating_timed_out(&mut self, pod: &Pod, now: Instant) -> bool {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let first = *self.first_creating.entry(pod_name).or_insert(now);
        if now.duration_since(first) >= self.timeout {
            return true;
        }
        pod_age(pod).is_some_and(|age| age >= self.timeout)
    }

    fn forget(&mut self, pod_name: &str) {
        self.first_creating.remove(pod_name);
    }
}

/// Classify the live pods of one workload.
///
/// Terminating pods are ignored. The worst classification across pods wins; a workload with
/// no live pod yet is still Pending.
pub fn classify_pods(pods: &[Pod], tracker: &mut PodHealthTracker, now: Instant) -> PodHealth {
    let live: Vec<&Pod> = pods
        .iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .collect();

    if live.is_empty() {
        return PodHealth::Pending;
    }

    let mut all_running = true;
    let mut any_unknown = false;

    for pod in live {
        match classify_pod(pod, tracker, now) {
            PodHealth::Running => {}
            PodHealth::Unknown => {
                all_running = false;
                any_unknown = true;
            }
            PodHealth::Pending => all_running = false,
            terminal => return terminal,
        }
    }

    if all_running {
        PodHealth::Running
    } else if any_unknown {
        PodHealth::Unknown
    } else {
        PodHealth::Pending
    }
}

/// Time since the cluster created the pod; None without a timestamp or for clock skew
fn pod_age(pod: &Pod) -> Option<Duration> {
    let created = pod.metadata.creation_timestamp.as_ref()?;
    (Utc::now() - created.0).to_std().ok()
}

fn classify_pod(pod: &Pod, tracker: &mut PodHealthTracker, now: Instant) -> PodHealth {
    let Some(status) = &pod.status else {
        return PodHealth::Pending;
    };

    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    let mut creating = false;

    for container in container_statuses {
        let reason = container
            .state
            .as_ref()
            .and_then(|state| state.waiting.as_ref())
            .and_then(|waiting| waiting.reason.as_deref());

        match reason {
            Some(CRASH_LOOP_BACK_OFF) => return PodHealth::CrashLoopBackOff,
            Some(reason) if IMAGE_PULL_FAILURES.contains(&reason) => return PodHealth::ImagePullError,
            Some(CONTAINER_CREATING) => creating = true,
            _ => {}
        }
    }

    if creating {
        if tracker.creating_timed_out(pod, now) {
            return PodHealth::ContainerCreatingTimeout;
        }
        return PodHealth::Pending;
    }
    tracker.forget(pod.metadata.name.as_deref().unwrap_or_default());

    if !container_statuses.is_empty() && container_statuses.iter().all(|container| container.ready) {
        return PodHealth::Running;
    }

    match status.phase.as_deref() {
        Some("Pending") | Some("Running") => PodHealth::Pending,
        _ => PodHealth::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{pod_ready, pod_waiting};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn test_no_pods_is_pending() {
        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));
        assert_eq!(classify_pods(&[], &mut tracker, Instant::now()), PodHealth::Pending);
    }

    #[test]
    fn test_ready_pod_is_running() {
        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));
        let pods = vec![pod_ready("web-1-abc")];
        assert_eq!(classify_pods(&pods, &mut tracker, Instant::now()), PodHealth::Running);
    }

    #[test]
    fn test_waiting_reasons() {
        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));
        let now = Instant::now();

        let crash = vec![pod_waiting("p", "CrashLoopBackOff")];
        assert_eq!(classify_pods(&crash, &mut tracker, now), PodHealth::CrashLoopBackOff);

        for reason in ["ErrImagePull", "ImagePullBackOff", "InvalidImageName"] {
            let pull = vec![pod_waiting("p", reason)];
            assert_eq!(classify_pods(&pull, &mut tracker, now), PodHealth::ImagePullError);
        }
    }

    #[test]
    fn test_container_creating_times_out() {
        let mut tracker = PodHealthTracker::new(Duration::from_secs(30));
        let pods = vec![pod_waiting("p", "ContainerCreating")];
        let start = Instant::now();

        assert_eq!(classify_pods(&pods, &mut tracker, start), PodHealth::Pending);
        assert_eq!(
            classify_pods(&pods, &mut tracker, start + Duration::from_secs(10)),
            PodHealth::Pending
        );
        assert_eq!(
            classify_pods(&pods, &mut tracker, start + Duration::from_secs(30)),
            PodHealth::ContainerCreatingTimeout
        );
    }

    #[test]
    fn test_fresh_tracker_without_pod_age_is_pending() {
        let pods = vec![pod_waiting("p", "ContainerCreating")];
        let mut tracker = PodHealthTracker::new(Duration::from_secs(30));
        assert_eq!(classify_pods(&pods, &mut tracker, Instant::now()), PodHealth::Pending);
    }

    #[test]
    fn test_old_creating_pod_times_out_on_first_look() {
        let mut pod = pod_waiting("p", "ContainerCreating");
        pod.metadata.creation_timestamp = Some(Time(Utc::now() - chrono::Duration::minutes(10)));
        let mut tracker = PodHealthTracker::new(Duration::from_secs(30));

        assert_eq!(
            classify_pods(&[pod], &mut tracker, Instant::now()),
            PodHealth::ContainerCreatingTimeout
        );
    }

    #[test]
    fn test_young_creating_pod_is_pending() {
        let mut pod = pod_waiting("p", "ContainerCreating");
        pod.metadata.creation_timestamp = Some(Time(Utc::now() - chrono::Duration::seconds(5)));
        let mut tracker = PodHealthTracker::new(Duration::from_secs(30));

        assert_eq!(classify_pods(&[pod], &mut tracker, Instant::now()), PodHealth::Pending);
    }

    #[test]
    fn test_terminating_pods_are_ignored() {
        let mut terminating = pod_waiting("old", "CrashLoopBackOff");
        terminating.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let pods = vec![terminating, pod_ready("new")];

        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));
        assert_eq!(classify_pods(&pods, &mut tracker, Instant::now()), PodHealth::Running);
    }

    #[test]
    fn test_pod_without_phase_is_unknown() {
        let mut pod = pod_waiting("p", "SomethingOdd");
        if let Some(status) = pod.status.as_mut() {
            status.phase = None;
        }
        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));
        let health = classify_pods(&[pod], &mut tracker, Instant::now());

        assert_eq!(health, PodHealth::Unknown);
        assert!(!health.is_terminal());
    }
}
