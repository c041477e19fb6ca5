//! Once-per-link release notifications.
//!
//! # Responsibility
//! - Record one `release` activity per newly linked project of a live
//!   release, timestamped with the release `date_released`.
//! - Hand each recorded activity to a `ReleaseNotifier`.
//!
//! # Invariants
//! - Nothing is recorded or sent while the release is not live.
//! - Only projects linked by the current call are considered.
//! - Dispatch is best-effort: a failure for one project is captured in the
//!   report and never prevents the remaining projects from being handled.

use crate::model::activity::{Activity, ActivityKind, NewActivity, ReleaseActivityData};
use crate::model::project::{Project, ProjectId};
use crate::model::release::Release;
use crate::repo::activity_repo::ActivityRepository;
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    message: String,
}

impl NotifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for NotifyError {}

/// Downstream side effect triggered for each recorded activity.
pub trait ReleaseNotifier {
    fn send_release_notification(
        &self,
        release: &Release,
        project: &Project,
        activity: &Activity,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ReleaseNotifier for LogNotifier {
    fn send_release_notification(
        &self,
        release: &Release,
        project: &Project,
        activity: &Activity,
    ) -> Result<(), NotifyError> {
        info!(
            "event=release_notify module=notify status=ok release_id={} project_id={} activity_id={}",
            release.id, project.id, activity.id
        );
        Ok(())
    }
}

impl<N: ReleaseNotifier + ?Sized> ReleaseNotifier for &N {
    fn send_release_notification(
        &self,
        release: &Release,
        project: &Project,
        activity: &Activity,
    ) -> Result<(), NotifyError> {
        (**self).send_release_notification(release, project, activity)
    }
}

/// Stage at which dispatch failed for one project.
#[derive(Debug)]
pub enum DispatchFailureKind {
    /// The activity row could not be written; no notification was sent.
    Record(RepoError),
    /// The activity was written but the notifier failed.
    Notify(NotifyError),
}

impl Display for DispatchFailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(err) => write!(f, "failed to record activity: {err}"),
            Self::Notify(err) => write!(f, "failed to send notification: {err}"),
        }
    }
}

/// Per-project dispatch failure.
#[derive(Debug)]
pub struct DispatchFailure {
    pub project_id: ProjectId,
    pub kind: DispatchFailureKind,
}

/// Outcome of one `notify_if_live` call.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Activities recorded, in project order.
    pub activities: Vec<Activity>,
    /// Projects whose activity was recorded and notification sent.
    pub notified: Vec<ProjectId>,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Emits activities and notifications for newly linked projects.
pub struct NotificationDispatcher<A: ActivityRepository, N: ReleaseNotifier> {
    activities: A,
    notifier: N,
}

impl<A: ActivityRepository, N: ReleaseNotifier> NotificationDispatcher<A, N> {
    pub fn new(activities: A, notifier: N) -> Self {
        Self {
            activities,
            notifier,
        }
    }

    /// Records and sends one notification per project in `newly_linked` when
    /// `release` is live; returns an empty report otherwise.
    pub fn notify_if_live(&self, release: &Release, newly_linked: &[Project]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(date_released) = release.date_released else {
            return report;
        };

        for project in newly_linked {
            let new_activity = NewActivity {
                kind: ActivityKind::Release,
                project_id: project.id,
                release_id: release.id,
                ident: release.version.clone(),
                data: ReleaseActivityData {
                    version: release.version.clone(),
                },
                datetime: date_released,
            };

            let activity = match self.activities.insert_activity(&new_activity) {
                Ok(activity) => activity,
                Err(err) => {
                    warn!(
                        "event=release_notify module=notify status=error error_code=activity_record_failed release_id={} project_id={} error={err}",
                        release.id, project.id
                    );
                    report.failures.push(DispatchFailure {
                        project_id: project.id,
                        kind: DispatchFailureKind::Record(err),
                    });
                    continue;
                }
            };

            match self
                .notifier
                .send_release_notification(release, project, &activity)
            {
                Ok(()) => report.notified.push(project.id),
                Err(err) => {
                    warn!(
                        "event=release_notify module=notify status=error error_code=notify_failed release_id={} project_id={} error={err}",
                        release.id, project.id
                    );
                    report.failures.push(DispatchFailure {
                        project_id: project.id,
                        kind: DispatchFailureKind::Notify(err),
                    });
                }
            }
            report.activities.push(activity);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DispatchFailureKind, NotificationDispatcher, NotifyError, ReleaseNotifier,
    };
    use crate::model::activity::{Activity, NewActivity};
    use crate::model::project::{Project, ProjectId};
    use crate::model::release::{Release, ReleaseId};
    use crate::repo::activity_repo::ActivityRepository;
    use crate::repo::{RepoError, RepoResult};
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeActivities {
        rows: RefCell<Vec<Activity>>,
        failing_project: Option<ProjectId>,
    }

    impl ActivityRepository for &FakeActivities {
        fn insert_activity(&self, activity: &NewActivity) -> RepoResult<Activity> {
            if self.failing_project == Some(activity.project_id) {
                return Err(RepoError::InvalidData("disk full".to_string()));
            }
            let mut rows = self.rows.borrow_mut();
            let stored = Activity {
                id: i64::try_from(rows.len()).unwrap() + 1,
                kind: activity.kind,
                project_id: activity.project_id,
                release_id: activity.release_id,
                ident: activity.ident.clone(),
                data: activity.data.clone(),
                datetime: activity.datetime,
            };
            rows.push(stored.clone());
            Ok(stored)
        }

        fn list_release_activities(&self, _release_id: ReleaseId) -> RepoResult<Vec<Activity>> {
            Ok(self.rows.borrow().clone())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<ProjectId>>,
        failing_project: Option<ProjectId>,
    }

    impl ReleaseNotifier for RecordingNotifier {
        fn send_release_notification(
            &self,
            _release: &Release,
            project: &Project,
            _activity: &Activity,
        ) -> Result<(), NotifyError> {
            if self.failing_project == Some(project.id) {
                return Err(NotifyError::new("smtp down"));
            }
            self.sent.borrow_mut().push(project.id);
            Ok(())
        }
    }

    fn release(date_released: Option<i64>) -> Release {
        Release {
            id: 5,
            tenant_id: 1,
            version: "2.0".to_string(),
            ref_name: None,
            url: None,
            owner_id: None,
            date_started: None,
            date_released,
            date_added: 0,
        }
    }

    fn project(id: ProjectId) -> Project {
        Project {
            id,
            tenant_id: 1,
            slug: format!("p{id}"),
            name: format!("Project {id}"),
        }
    }

    #[test]
    fn not_live_release_emits_nothing() {
        let activities = FakeActivities::default();
        let notifier = RecordingNotifier::default();
        let dispatcher = NotificationDispatcher::new(&activities, &notifier);

        let report = dispatcher.notify_if_live(&release(None), &[project(1), project(2)]);
        assert!(report.activities.is_empty());
        assert!(report.is_clean());
        assert!(activities.rows.borrow().is_empty());
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn live_release_emits_one_activity_per_project() {
        let activities = FakeActivities::default();
        let notifier = RecordingNotifier::default();
        let dispatcher = NotificationDispatcher::new(&activities, &notifier);

        let report = dispatcher.notify_if_live(&release(Some(1_000)), &[project(1), project(2)]);
        assert_eq!(report.notified, vec![1, 2]);
        assert_eq!(*notifier.sent.borrow(), vec![1, 2]);

        let rows = activities.rows.borrow();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.datetime == 1_000));
        assert!(rows.iter().all(|row| row.ident == "2.0" && row.data.version == "2.0"));
    }

    #[test]
    fn failure_for_one_project_does_not_block_others() {
        let activities = FakeActivities {
            failing_project: Some(1),
            ..FakeActivities::default()
        };
        let notifier = RecordingNotifier {
            failing_project: Some(2),
            ..RecordingNotifier::default()
        };
        let dispatcher = NotificationDispatcher::new(&activities, &notifier);

        let report = dispatcher.notify_if_live(
            &release(Some(1_000)),
            &[project(1), project(2), project(3)],
        );
        assert_eq!(report.notified, vec![3]);
        assert_eq!(report.activities.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[0].kind,
            DispatchFailureKind::Record(_)
        ));
        assert!(matches!(
            report.failures[1].kind,
            DispatchFailureKind::Notify(_)
        ));
    }
}
