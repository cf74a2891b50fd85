//! In-memory engine and store for unit tests.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    engine::{ExecutionMode, ExecutionReply, GearsEngine, NOOP_SCRIPT},
    error::{Result, SyncError},
    reconcile::RegistrationSnapshot,
    records::{RecordKey, RegistrationRecord, RegistrationStore},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Call {
    Execute {
        script: String,
        mode: ExecutionMode,
        requirements: Vec<String>,
    },
    List,
    Unregister(String),
    Load(String),
    Save(String),
    Remove(String),
}

/// Every non-noop script registers `registrations_per_script` new functions.
#[derive(Debug)]
pub(crate) struct FakeGears {
    registrations: Mutex<BTreeSet<String>>,
    records: Mutex<HashMap<String, RegistrationRecord>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    pub registrations_per_script: AtomicUsize,
    pub offline: AtomicBool,
    /// `RG.UNREGISTER` times out while everything else works.
    pub unregister_times_out: AtomicBool,
}

impl Default for FakeGears {
    fn default() -> Self {
        Self {
            registrations: Mutex::default(),
            records: Mutex::default(),
            calls: Mutex::default(),
            next_id: AtomicUsize::new(1),
            registrations_per_script: AtomicUsize::new(1),
            offline: AtomicBool::new(false),
            unregister_times_out: AtomicBool::new(false),
        }
    }
}

impl FakeGears {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn registrations(&self) -> BTreeSet<String> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn record(&self, key: &str) -> Option<RegistrationRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn insert_record(&self, key: &str, registration_id: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), RegistrationRecord::new(registration_id));
    }

    pub fn unregister_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Unregister(_)))
            .count()
    }

    fn log(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Redis(redis::RedisError::from(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "engine offline"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GearsEngine for FakeGears {
    async fn execute(
        &self,
        script: &str,
        mode: ExecutionMode,
        requirements: &[String],
    ) -> Result<ExecutionReply> {
        self.log(Call::Execute {
            script: script.to_string(),
            mode,
            requirements: requirements.to_vec(),
        })?;

        if script != NOOP_SCRIPT {
            let count = self.registrations_per_script.load(Ordering::SeqCst);
            let mut registrations = self.registrations.lock().unwrap();
            for _ in 0..count {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                registrations.insert(format!("0000000000000000000000000000000000000000-{n}"));
            }
        }
        Ok(ExecutionReply::Ok)
    }

    async fn list_registrations(&self) -> Result<RegistrationSnapshot> {
        self.log(Call::List)?;
        Ok(self.registrations.lock().unwrap().iter().cloned().collect())
    }

    async fn remove_registration(&self, registration_id: &str) -> Result<()> {
        self.log(Call::Unregister(registration_id.to_string()))?;
        if self.unregister_times_out.load(Ordering::SeqCst) {
            return Err(SyncError::Redis(redis::RedisError::from(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "unregister timed out"),
            )));
        }
        if self.registrations.lock().unwrap().remove(registration_id) {
            Ok(())
        } else {
            Err(SyncError::UnknownRegistration(registration_id.to_string()))
        }
    }
}

#[async_trait]
impl RegistrationStore for FakeGears {
    async fn load(&self, key: &RecordKey) -> Result<Option<RegistrationRecord>> {
        self.log(Call::Load(key.to_string()))?;
        Ok(self.records.lock().unwrap().get(key.as_str()).cloned())
    }

    async fn save(&self, key: &RecordKey, record: &RegistrationRecord) -> Result<()> {
        self.log(Call::Save(key.to_string()))?;
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<()> {
        self.log(Call::Remove(key.to_string()))?;
        self.records.lock().unwrap().remove(key.as_str());
        Ok(())
    }
}
