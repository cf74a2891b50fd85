//! Register, unregister and update-dependencies actions.
//!
//! These run when a debounced signal fires. Only precondition failures
//! (nothing submittable on disk) come back as `Err`; everything that happens
//! after the first remote call is reported through the outcome enums so that
//! [`ActionDispatcher::perform`] can log it and move on.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error, info, warn};

use crate::{
    classify::SyncAction,
    engine::{ExecutionMode, ExecutionReply, GearsEngine, NOOP_SCRIPT},
    error::{Result, SyncError},
    reconcile::{Reconciliation, reconcile},
    records::{DEFAULT_INDEX_PREFIX, RecordKey, RegistrationRecord, RegistrationStore},
    requirements::read_requirements,
};

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// Prefix of every record key in the store.
    pub index_prefix: String,
    pub execution_mode: ExecutionMode,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
            execution_mode: ExecutionMode::default(),
        }
    }
}

#[derive(Debug)]
pub enum RegisterOutcome {
    /// Exactly one registration appeared and was recorded.
    Registered(String),
    /// The script ran but left no registration behind.
    Executed(ExecutionReply),
    /// Several registrations appeared; `chosen` was recorded.
    Ambiguous {
        chosen: String,
        candidates: Vec<String>,
    },
    Failed(SyncError),
}

#[derive(Debug)]
pub enum UnregisterOutcome {
    NotRegistered,
    Removed(String),
    /// The engine did not know the recorded registration.
    Rejected(String),
    Failed(SyncError),
}

#[derive(Debug)]
pub enum DependencyOutcome {
    /// The manifest lists nothing; no remote call was made.
    Skipped,
    Installed {
        requirements: Vec<String>,
        reply: ExecutionReply,
    },
    Failed(SyncError),
}

/// Runs sync actions against a [`GearsEngine`], keeping the registration
/// index in a [`RegistrationStore`].
pub struct ActionDispatcher {
    engine: Arc<dyn GearsEngine>,
    store: Arc<dyn RegistrationStore>,
    settings: DispatchSettings,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    pub fn new(
        engine: Arc<dyn GearsEngine>,
        store: Arc<dyn RegistrationStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            engine,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    fn record_key(&self, path: &Path) -> RecordKey {
        RecordKey::for_path(&self.settings.index_prefix, path)
    }

    /// Execute the script at `path` and record the registration it creates.
    ///
    /// Any registration previously recorded for `path` is removed first.
    pub async fn register(&self, path: &Path) -> Result<RegisterOutcome> {
        let script = read_script(path).await?;

        match self.submit_script(path, &script).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Ok(RegisterOutcome::Failed(err)),
        }
    }

    async fn submit_script(&self, path: &Path, script: &str) -> Result<RegisterOutcome> {
        let key = self.record_key(path);
        self.release_previous(path, &key).await?;

        let before = self.engine.list_registrations().await?;
        let reply = self
            .engine
            .execute(script, self.settings.execution_mode, &[])
            .await?;
        for message in reply.errors() {
            warn!(path = %path.display(), "script reported an error: {message}");
        }
        let after = self.engine.list_registrations().await?;

        match reconcile(&before, &after) {
            Reconciliation::Unchanged => {
                debug!(path = %path.display(), %reply, "script executed without registering anything");
                Ok(RegisterOutcome::Executed(reply))
            }
            Reconciliation::Created(id) => {
                self.store.save(&key, &RegistrationRecord::new(&id)).await?;
                Ok(RegisterOutcome::Registered(id))
            }
            Reconciliation::Ambiguous { chosen, candidates } => {
                warn!(
                    path = %path.display(),
                    chosen = %chosen,
                    ?candidates,
                    "several registrations appeared while registering; index may be corrupt"
                );
                self.store
                    .save(&key, &RegistrationRecord::new(&chosen))
                    .await?;
                Ok(RegisterOutcome::Ambiguous { chosen, candidates })
            }
        }
    }

    /// Remove whatever `path` registered before. On a transport failure the
    /// record is kept and the registration aborted; the next attempt retries.
    async fn release_previous(&self, path: &Path, key: &RecordKey) -> Result<()> {
        let Some(record) = self.store.load(key).await? else {
            return Ok(());
        };

        match self.engine.remove_registration(&record.registration_id).await {
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    registration_id = %record.registration_id,
                    "removed previous registration"
                );
            }
            Err(SyncError::UnknownRegistration(id)) => {
                warn!(
                    path = %path.display(),
                    registration_id = %id,
                    "engine does not know the recorded registration; index may be corrupt"
                );
            }
            Err(err) => return Err(err),
        }

        self.store.remove(key).await
    }

    /// Remove the registration recorded for `path`, if any, and forget it.
    pub async fn unregister(&self, path: &Path) -> UnregisterOutcome {
        let key = self.record_key(path);
        let record = match self.store.load(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => return UnregisterOutcome::NotRegistered,
            Err(err) => return UnregisterOutcome::Failed(err),
        };

        let id = record.registration_id;
        let outcome = match self.engine.remove_registration(&id).await {
            Ok(()) => UnregisterOutcome::Removed(id),
            Err(SyncError::UnknownRegistration(id)) => {
                warn!(
                    path = %path.display(),
                    registration_id = %id,
                    "engine does not know the recorded registration; index may be corrupt"
                );
                UnregisterOutcome::Rejected(id)
            }
            Err(err) => UnregisterOutcome::Failed(err),
        };

        if let Err(err) = self.store.remove(&key).await {
            error!(key = %key, "failed to delete index entry: {err}");
        }
        outcome
    }

    /// Ask the engine to install everything listed in the manifest at `path`.
    pub async fn update_dependencies(&self, path: &Path) -> Result<DependencyOutcome> {
        let requirements = read_requirements(path).await?;
        if requirements.is_empty() {
            return Ok(DependencyOutcome::Skipped);
        }

        match self
            .engine
            .execute(NOOP_SCRIPT, self.settings.execution_mode, &requirements)
            .await
        {
            Ok(reply) => Ok(DependencyOutcome::Installed {
                requirements,
                reply,
            }),
            Err(err) => Ok(DependencyOutcome::Failed(err)),
        }
    }

    /// Run `action` for `path` and log how it went. Never fails.
    pub async fn perform(&self, action: SyncAction, path: PathBuf) {
        debug!(%action, path = %path.display(), "running sync action");

        match action {
            SyncAction::Register => match self.register(&path).await {
                Ok(RegisterOutcome::Registered(id)) => {
                    info!(path = %path.display(), registration_id = %id, "script registered");
                }
                Ok(RegisterOutcome::Executed(reply)) => {
                    info!(path = %path.display(), %reply, "script executed");
                }
                Ok(RegisterOutcome::Ambiguous { chosen, .. }) => {
                    info!(path = %path.display(), registration_id = %chosen, "script registered");
                }
                Ok(RegisterOutcome::Failed(err)) | Err(err) => log_failure(action, &path, &err),
            },
            SyncAction::Unregister => match self.unregister(&path).await {
                UnregisterOutcome::NotRegistered => {
                    debug!(path = %path.display(), "no registration recorded");
                }
                UnregisterOutcome::Removed(id) => {
                    info!(path = %path.display(), registration_id = %id, "script unregistered");
                }
                UnregisterOutcome::Rejected(_) => {}
                UnregisterOutcome::Failed(err) => log_failure(action, &path, &err),
            },
            SyncAction::UpdateDependencies => match self.update_dependencies(&path).await {
                Ok(DependencyOutcome::Skipped) => {
                    info!(path = %path.display(), "requirements file lists nothing to install");
                }
                Ok(DependencyOutcome::Installed {
                    requirements,
                    reply,
                }) => {
                    info!(
                        path = %path.display(),
                        count = requirements.len(),
                        %reply,
                        "requirements installed"
                    );
                }
                Ok(DependencyOutcome::Failed(err)) | Err(err) => {
                    log_failure(action, &path, &err)
                }
            },
        }
    }
}

fn log_failure(action: SyncAction, path: &Path, err: &SyncError) {
    error!(
        %action,
        path = %path.display(),
        class = ?err.class(),
        "sync action failed: {err}"
    );
}

async fn read_script(path: &Path) -> Result<String> {
    let missing = || SyncError::FileNotFound {
        path: path.to_path_buf(),
    };

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_file() {
        return Err(missing());
    }
    if metadata.len() == 0 {
        return Err(SyncError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    match tokio::fs::read_to_string(path).await {
        Ok(script) if script.is_empty() => Err(SyncError::EmptyFile {
            path: path.to_path_buf(),
        }),
        Ok(script) => Ok(script),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(missing()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use tempfile::TempDir;
    use tracing_test::traced_test;

    use crate::error::ErrorClass;
    use crate::testing::{Call, FakeGears};

    const SCRIPT: &str = "GB().register('person:*')\n";

    fn dispatcher(fake: &Arc<FakeGears>) -> ActionDispatcher {
        ActionDispatcher::new(fake.clone(), fake.clone(), DispatchSettings::default())
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn key(path: &Path) -> String {
        RecordKey::for_path(DEFAULT_INDEX_PREFIX, path).to_string()
    }

    #[tokio::test]
    async fn missing_file_makes_no_remote_calls() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();

        let err = dispatcher(&fake)
            .register(&dir.path().join("gone.py"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::FileNotFound { .. }));
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_file_makes_no_remote_calls() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "empty.py", "");

        let err = dispatcher(&fake).register(&path).await.unwrap_err();

        assert!(matches!(err, SyncError::EmptyFile { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn directory_is_not_a_script() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg.py")).unwrap();

        let err = dispatcher(&fake)
            .register(&dir.path().join("pkg.py"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FileNotFound { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn register_records_the_new_registration() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);

        let outcome = dispatcher(&fake).register(&path).await.unwrap();

        let id = match outcome {
            RegisterOutcome::Registered(id) => id,
            other => panic!("expected registration, got {other:?}"),
        };
        assert!(fake.registrations().contains(&id));
        assert_eq!(fake.record(&key(&path)).unwrap().registration_id, id);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Load(key(&path)),
                Call::List,
                Call::Execute {
                    script: SCRIPT.to_string(),
                    mode: ExecutionMode::Blocking,
                    requirements: vec![],
                },
                Call::List,
                Call::Save(key(&path)),
            ]
        );
    }

    #[tokio::test]
    async fn reregister_replaces_the_previous_registration() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = dispatcher(&fake);

        let RegisterOutcome::Registered(first) = dispatcher.register(&path).await.unwrap() else {
            panic!("first registration failed");
        };
        let RegisterOutcome::Registered(second) = dispatcher.register(&path).await.unwrap() else {
            panic!("second registration failed");
        };

        assert_ne!(first, second);
        assert_eq!(fake.registrations().into_iter().collect::<Vec<_>>(), vec![second]);
    }

    #[tokio::test]
    async fn script_without_registrations_records_nothing() {
        let fake = Arc::new(FakeGears::default());
        fake.registrations_per_script.store(0, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "batch.py", "GB().run()\n");

        let outcome = dispatcher(&fake).register(&path).await.unwrap();

        assert!(matches!(outcome, RegisterOutcome::Executed(ExecutionReply::Ok)));
        assert!(fake.record(&key(&path)).is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn ambiguous_delta_records_one_candidate() {
        let fake = Arc::new(FakeGears::default());
        fake.registrations_per_script.store(2, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);

        let outcome = dispatcher(&fake).register(&path).await.unwrap();

        let (chosen, candidates) = match outcome {
            RegisterOutcome::Ambiguous { chosen, candidates } => (chosen, candidates),
            other => panic!("expected ambiguous outcome, got {other:?}"),
        };
        assert_eq!(candidates.len(), 2);
        assert!(candidates.contains(&chosen));
        assert_eq!(fake.record(&key(&path)).unwrap().registration_id, chosen);
        assert!(logs_contain("index may be corrupt"));
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_preclean_aborts_registration_and_keeps_record() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = dispatcher(&fake);

        let RegisterOutcome::Registered(first) = dispatcher.register(&path).await.unwrap() else {
            panic!("first registration failed");
        };
        fake.unregister_times_out.store(true, Ordering::SeqCst);
        fake.clear_calls();

        let err = match dispatcher.register(&path).await.unwrap() {
            RegisterOutcome::Failed(err) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(err.class(), ErrorClass::Remote);
        assert!(!fake.calls().iter().any(|call| matches!(call, Call::Execute { .. })));
        assert_eq!(fake.registrations().into_iter().collect::<Vec<_>>(), vec![first.clone()]);
        assert_eq!(fake.record(&key(&path)).unwrap().registration_id, first);

        dispatcher.perform(SyncAction::Register, path.clone()).await;
        assert!(logs_contain("sync action failed"));
        assert_eq!(fake.registrations().len(), 1);

        fake.unregister_times_out.store(false, Ordering::SeqCst);
        let RegisterOutcome::Registered(second) = dispatcher.register(&path).await.unwrap() else {
            panic!("retry failed");
        };
        assert_eq!(fake.registrations().into_iter().collect::<Vec<_>>(), vec![second]);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = dispatcher(&fake);
        dispatcher.register(&path).await.unwrap();
        fake.clear_calls();

        assert!(matches!(
            dispatcher.unregister(&path).await,
            UnregisterOutcome::Removed(_)
        ));
        assert!(matches!(
            dispatcher.unregister(&path).await,
            UnregisterOutcome::NotRegistered
        ));

        assert_eq!(fake.unregister_calls(), 1);
        assert!(fake.record(&key(&path)).is_none());
    }

    #[tokio::test]
    async fn register_then_unregister_restores_registration_set() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = dispatcher(&fake);
        let before = fake.registrations();

        dispatcher.register(&path).await.unwrap();
        dispatcher.unregister(&path).await;

        assert_eq!(fake.registrations(), before);
    }

    #[tokio::test]
    async fn unknown_registration_still_drops_the_record() {
        let fake = Arc::new(FakeGears::default());
        let path = PathBuf::from("/srv/gears/a.py");
        fake.insert_record(&key(&path), "stale-id");

        let outcome = dispatcher(&fake).unregister(&path).await;

        assert!(matches!(outcome, UnregisterOutcome::Rejected(ref id) if id == "stale-id"));
        assert!(fake.record(&key(&path)).is_none());
    }

    #[tokio::test]
    async fn update_dependencies_submits_noop_with_requirements() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "requirements.txt", "numpy\n# comment\npandas==2.1.0\n");

        let outcome = dispatcher(&fake).update_dependencies(&path).await.unwrap();

        assert!(matches!(outcome, DependencyOutcome::Installed { .. }));
        assert_eq!(
            fake.calls(),
            vec![Call::Execute {
                script: NOOP_SCRIPT.to_string(),
                mode: ExecutionMode::Blocking,
                requirements: vec!["numpy".to_string(), "pandas==2.1.0".to_string()],
            }]
        );
        assert!(fake.registrations().is_empty());
    }

    #[tokio::test]
    async fn empty_manifest_is_skipped() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "requirements.txt", "# nothing\n");

        let outcome = dispatcher(&fake).update_dependencies(&path).await.unwrap();

        assert!(matches!(outcome, DependencyOutcome::Skipped));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn unblocking_mode_is_forwarded() {
        let fake = Arc::new(FakeGears::default());
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = ActionDispatcher::new(
            fake.clone(),
            fake.clone(),
            DispatchSettings {
                execution_mode: ExecutionMode::Unblocking,
                ..DispatchSettings::default()
            },
        );

        dispatcher.register(&path).await.unwrap();

        assert!(fake.calls().iter().any(|call| matches!(
            call,
            Call::Execute {
                mode: ExecutionMode::Unblocking,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn remote_failure_is_reported_not_raised() {
        let fake = Arc::new(FakeGears::default());
        fake.offline.store(true, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.py", SCRIPT);
        let dispatcher = dispatcher(&fake);

        let outcome = dispatcher.register(&path).await.unwrap();
        let err = match outcome {
            RegisterOutcome::Failed(err) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(err.class(), ErrorClass::Remote);

        // perform() swallows everything.
        dispatcher.perform(SyncAction::Register, path.clone()).await;
        dispatcher.perform(SyncAction::Unregister, path).await;

        fake.offline.store(false, Ordering::SeqCst);
        let path = write(&dir, "b.py", SCRIPT);
        assert!(matches!(
            dispatcher.register(&path).await.unwrap(),
            RegisterOutcome::Registered(_)
        ));
    }
}
