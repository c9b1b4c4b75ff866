use crate::appliance::{
    ApplianceClient, ApplianceError, ApplianceSession, DeviceInformation, MetricGroup,
    StorageInfo, Utilization,
};
use crate::snapshot::{DeviceSnapshot, VolumeNames};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

/// Bound for the logout that follows every session, independent of the run
/// deadline.
pub const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to open appliance session: {0}")]
    Session(#[source] ApplianceError),
    #[error("failed to refresh {group} metrics: {source}")]
    Refresh {
        group: MetricGroup,
        #[source]
        source: ApplianceError,
    },
    #[error("collection did not finish before the run deadline")]
    DeadlineExceeded,
}

impl CollectionError {
    pub fn stage(&self) -> &'static str {
        match self {
            CollectionError::Session(_) => "session",
            CollectionError::Refresh { group, .. } => group.as_str(),
            CollectionError::DeadlineExceeded => "deadline",
        }
    }

    /// True when the appliance refused the credentials or the session.
    pub fn is_auth(&self) -> bool {
        match self {
            CollectionError::Session(source) | CollectionError::Refresh { source, .. } => {
                source.is_auth()
            }
            CollectionError::DeadlineExceeded => false,
        }
    }
}

/// Reads every metric group and builds one snapshot, or fails as a whole.
///
/// Login and the reads stop at `deadline`. Once a session exists it is closed
/// whatever happened to the reads, with its own [`SESSION_CLOSE_TIMEOUT`].
pub async fn collect<C: ApplianceClient>(
    client: &C,
    names: &VolumeNames,
    deadline: Instant,
) -> Result<DeviceSnapshot, CollectionError> {
    let session = timeout_at(deadline, client.open_session())
        .await
        .map_err(|_elapsed| CollectionError::DeadlineExceeded)?
        .map_err(CollectionError::Session)?;
    debug!("appliance session opened");

    let fetched = timeout_at(deadline, refresh_all(&session))
        .await
        .unwrap_or(Err(CollectionError::DeadlineExceeded));
    close_session(session).await;

    let (information, utilization, storage) = fetched?;
    debug!(
        volumes = storage.volumes.len(),
        disks = storage.disks.len(),
        "metric groups refreshed"
    );
    Ok(DeviceSnapshot::assemble(
        &information,
        &utilization,
        &storage,
        names,
    ))
}

async fn close_session<S: ApplianceSession>(session: S) {
    match timeout(SESSION_CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to close appliance session"),
        Err(_elapsed) => warn!(
            timeout = ?SESSION_CLOSE_TIMEOUT,
            "appliance session close timed out"
        ),
    }
}

async fn refresh_all<S: ApplianceSession>(
    session: &S,
) -> Result<(DeviceInformation, Utilization, StorageInfo), CollectionError> {
    let refresh_failed = |group| {
        move |source| CollectionError::Refresh { group, source }
    };

    let information = session
        .information()
        .await
        .map_err(refresh_failed(MetricGroup::Information))?;
    let utilization = session
        .utilization()
        .await
        .map_err(refresh_failed(MetricGroup::Utilization))?;
    let storage = session
        .storage()
        .await
        .map_err(refresh_failed(MetricGroup::Storage))?;
    Ok((information, utilization, storage))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::appliance::{Disk, Volume, VolumeSize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory appliance. `fail` picks the group that errors.
    #[derive(Clone, Default)]
    pub struct StubAppliance {
        pub reject_login: bool,
        pub fail: Option<MetricGroup>,
        /// Logout never answers.
        pub hang_on_close: bool,
        pub opened: Arc<AtomicUsize>,
        pub closed: Arc<AtomicUsize>,
    }

    pub struct StubSession {
        fail: Option<MetricGroup>,
        hang_on_close: bool,
        closed: Arc<AtomicUsize>,
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    impl ApplianceClient for StubAppliance {
        type Session = StubSession;

        async fn open_session(&self) -> Result<StubSession, ApplianceError> {
            if self.reject_login {
                return Err(ApplianceError::Authentication {
                    code: 400,
                    message: "no such account or incorrect password".to_string(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(StubSession {
                fail: self.fail,
                hang_on_close: self.hang_on_close,
                closed: self.closed.clone(),
            })
        }
    }

    impl StubSession {
        fn check(&self, group: MetricGroup) -> Result<(), ApplianceError> {
            if self.fail == Some(group) {
                return Err(ApplianceError::Timeout {
                    api: group.to_string(),
                });
            }
            Ok(())
        }
    }

    impl ApplianceSession for StubSession {
        async fn information(&self) -> Result<DeviceInformation, ApplianceError> {
            self.check(MetricGroup::Information)?;
            Ok(DeviceInformation {
                model: "DS1821+".to_string(),
                ram: 8192,
                serial: "21A0SBR000001".to_string(),
                temperature: 44.0,
                temperature_warn: false,
                uptime: 90_061,
                version_string: "DSM 7.2.2-72806".to_string(),
            })
        }

        async fn utilization(&self) -> Result<Utilization, ApplianceError> {
            self.check(MetricGroup::Utilization)?;
            Ok(Utilization {
                cpu_total_load: 7.0,
                memory_real_usage: 21.0,
                network_up: 512.0,
                network_down: 768.0,
            })
        }

        async fn storage(&self) -> Result<StorageInfo, ApplianceError> {
            self.check(MetricGroup::Storage)?;
            Ok(StorageInfo {
                volumes: vec![
                    Volume {
                        id: "volume_1".to_string(),
                        status: "normal".to_string(),
                        size: VolumeSize {
                            total: Some(2_199_023_255_552),
                            used: Some(1_099_511_627_776),
                        },
                    },
                    Volume {
                        id: "volume_2".to_string(),
                        status: "normal".to_string(),
                        size: VolumeSize {
                            total: Some(2_199_023_255_552),
                            used: Some(2_199_023_255_552),
                        },
                    },
                ],
                disks: vec![Disk {
                    id: "sata1".to_string(),
                    name: Some("Drive 1".to_string()),
                    status: Some("normal".to_string()),
                    smart_status: Some("normal".to_string()),
                    temperature: Some(33.0),
                }],
            })
        }

        async fn close(self) -> Result<(), ApplianceError> {
            if self.hang_on_close {
                std::future::pending::<()>().await;
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn collects_full_snapshot() {
        let appliance = StubAppliance::default();
        let snapshot = collect(&appliance, &VolumeNames::default(), deadline())
            .await
            .expect("collect succeeds");

        assert_eq!(snapshot.model, "DS1821+");
        assert_eq!(snapshot.overall_percent_used, 75);
        assert_eq!(
            (snapshot.uptime_days, snapshot.uptime_hours, snapshot.uptime_minutes),
            (1, 1, 1)
        );
        assert_eq!(snapshot.volumes.len(), 2);
        assert_eq!(snapshot.disks.len(), 1);
        assert_eq!(appliance.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn utilization_timeout_fails_collection_and_closes_session() {
        let appliance = StubAppliance {
            fail: Some(MetricGroup::Utilization),
            ..StubAppliance::default()
        };
        let err = collect(&appliance, &VolumeNames::default(), deadline())
            .await
            .expect_err("utilization fails");

        assert_eq!(err.stage(), "utilization");
        assert!(matches!(
            err,
            CollectionError::Refresh {
                group: MetricGroup::Utilization,
                source: ApplianceError::Timeout { .. }
            }
        ));
        assert_eq!(appliance.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_login_is_session_error() {
        let appliance = StubAppliance {
            reject_login: true,
            ..StubAppliance::default()
        };
        let err = collect(&appliance, &VolumeNames::default(), deadline())
            .await
            .expect_err("login fails");

        assert_eq!(err.stage(), "session");
        assert!(err.is_auth());
        assert!(matches!(err, CollectionError::Session(_)));
        assert_eq!(appliance.opened.load(Ordering::SeqCst), 0);
        assert_eq!(appliance.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_logout_keeps_the_snapshot() {
        let appliance = StubAppliance {
            hang_on_close: true,
            ..StubAppliance::default()
        };
        let started = Instant::now();

        let snapshot = collect(&appliance, &VolumeNames::default(), deadline())
            .await
            .expect("data was gathered before logout");

        assert_eq!(snapshot.overall_percent_used, 75);
        assert!(started.elapsed() >= SESSION_CLOSE_TIMEOUT);
        assert_eq!(appliance.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadline_still_logs_out() {
        use crate::appliance::dsm::{DsmClient, API_STORAGE};
        use crate::test_support::{appliance_config, serve, FakeDsm};

        let fake = FakeDsm {
            stalled_api: Some(API_STORAGE),
            ..FakeDsm::default()
        };
        let addr = serve(fake.router()).await;
        let client =
            DsmClient::new(&appliance_config(addr, FakeDsm::PASSWORD)).expect("client builds");

        let err = collect(
            &client,
            &VolumeNames::default(),
            Instant::now() + Duration::from_millis(500),
        )
        .await
        .expect_err("storage never answers");

        assert!(matches!(err, CollectionError::DeadlineExceeded));
        assert_eq!(err.stage(), "deadline");
        assert_eq!(fake.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn collects_from_dsm_api() {
        use crate::appliance::dsm::DsmClient;
        use crate::test_support::{appliance_config, serve, FakeDsm};

        let fake = FakeDsm::default();
        let addr = serve(fake.router()).await;
        let client =
            DsmClient::new(&appliance_config(addr, FakeDsm::PASSWORD)).expect("client builds");

        let snapshot = collect(&client, &VolumeNames::default(), deadline())
            .await
            .expect("collect succeeds");

        assert_eq!(snapshot.overall_percent_used, 75);
        assert_eq!(snapshot.cpu_percent, 9.0);
        assert_eq!(snapshot.uptime_days, 14);
        assert_eq!(snapshot.volumes[1].name, "k8s-data");
        assert_eq!(snapshot.disks[1].temperature, Some(38.0));
        assert_eq!(fake.logouts.load(Ordering::SeqCst), 1);
    }
}
