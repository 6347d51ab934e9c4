use crate::commitlog::TxId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    NotConnected,
    Electing,
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::NotConnected => "NOT_CONNECTED",
            Role::Electing => "ELECTING",
            Role::Master => "MASTER",
            Role::Slave => "SLAVE",
        };
        f.write_str(name)
    }
}

/// What this node currently believes about its place in the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RoleSnapshot {
    NotConnected,
    Electing,
    Master { up_since: DateTime<Utc> },
    /// `up` is false while the slave is still bootstrapping from the master.
    Slave { master_id: String, up: bool },
}

impl RoleSnapshot {
    pub fn role(&self) -> Role {
        match self {
            RoleSnapshot::NotConnected => Role::NotConnected,
            RoleSnapshot::Electing => Role::Electing,
            RoleSnapshot::Master { .. } => Role::Master,
            RoleSnapshot::Slave { .. } => Role::Slave,
        }
    }

    pub fn master_id<'a>(&'a self, self_id: &'a str) -> Option<&'a str> {
        match self {
            RoleSnapshot::Master { .. } => Some(self_id),
            RoleSnapshot::Slave { master_id, .. } => Some(master_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: String,
    pub role: Role,
    pub ms_since_last_contact: Option<i64>,
    pub connected: bool,
    pub error_message: Option<String>,
}

/// A slave as seen by the master.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveRecord {
    pub id: String,
    pub connected_since: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
    /// Next tx id the slave will receive.
    pub position: TxId,
    pub connected: bool,
    pub error_message: Option<String>,
}

impl SlaveRecord {
    pub(crate) fn new(id: &str, position: TxId) -> Self {
        let now = Utc::now();
        SlaveRecord {
            id: id.to_string(),
            connected_since: now,
            last_contact: now,
            position,
            connected: true,
            error_message: None,
        }
    }

    pub(crate) fn to_status(&self, now: DateTime<Utc>) -> ServerStatus {
        ServerStatus {
            id: self.id.clone(),
            role: Role::Slave,
            ms_since_last_contact: Some((now - self.last_contact).num_milliseconds()),
            connected: self.connected,
            error_message: self.error_message.clone(),
        }
    }
}

/// The slave's view of its master.
#[derive(Clone, Debug, Default)]
pub(crate) struct MasterContact {
    pub last_contact: Option<DateTime<Utc>>,
    pub connected: bool,
    pub error_message: Option<String>,
}

#[derive(Default)]
pub(crate) struct ContactTracker {
    contact: Mutex<MasterContact>,
}

impl ContactTracker {
    pub fn reset(&self) {
        *self.lock() = MasterContact::default();
    }

    pub fn contacted(&self) {
        let mut contact = self.lock();
        contact.last_contact = Some(Utc::now());
        contact.connected = true;
        contact.error_message = None;
    }

    pub fn failed(&self, error_message: String) {
        let mut contact = self.lock();
        contact.connected = false;
        contact.error_message = Some(error_message);
    }

    pub fn get(&self) -> MasterContact {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MasterContact> {
        self.contact.lock().expect("Master contact mutex poison")
    }
}

/// Slaves streaming from this node while it is master.
#[derive(Default)]
pub(crate) struct SlaveTracker {
    slaves: Mutex<BTreeMap<String, SlaveRecord>>,
}

impl SlaveTracker {
    /// Start tracking a slave's stream. The returned time identifies this stream in later calls.
    pub fn connected(&self, id: &str, position: TxId) -> DateTime<Utc> {
        let record = SlaveRecord::new(id, position);
        let since = record.connected_since;
        self.lock().insert(id.to_string(), record);
        since
    }

    /// Only updates the slave if it is still tracked for the same stream, so a stream left
    /// over from before an election or a reconnect cannot overwrite a newer one.
    pub fn contacted(&self, id: &str, since: DateTime<Utc>, position: TxId) {
        self.update(id, since, |record| {
            record.last_contact = Utc::now();
            record.position = position;
        });
    }

    pub fn disconnected(&self, id: &str, since: DateTime<Utc>, error_message: Option<String>) {
        self.update(id, since, |record| {
            record.connected = false;
            record.error_message = error_message;
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn list(&self) -> Vec<SlaveRecord> {
        self.lock().values().cloned().collect()
    }

    fn update(&self, id: &str, since: DateTime<Utc>, f: impl FnOnce(&mut SlaveRecord)) {
        if let Some(record) = self.lock().get_mut(id) {
            if record.connected_since == since {
                f(record);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SlaveRecord>> {
        self.slaves.lock().expect("Slave tracker mutex poison")
    }
}

pub(super) fn role_channel() -> (RoleNotifier, RoleChangeListener) {
    let (snd, rcv) = watch::channel(RoleSnapshot::NotConnected);

    (RoleNotifier { snd }, RoleChangeListener { rcv })
}

pub(super) struct RoleNotifier {
    snd: watch::Sender<RoleSnapshot>,
}

impl RoleNotifier {
    pub(super) fn notify_new_role(&self, new_role: RoleSnapshot) {
        let _ = self.snd.send(new_role);
    }
}

#[derive(Clone)]
pub struct RoleChangeListener {
    rcv: watch::Receiver<RoleSnapshot>,
}

impl RoleChangeListener {
    pub fn current(&self) -> RoleSnapshot {
        self.rcv.borrow().clone()
    }

    /// The next role change, or None once the node has shut down.
    pub async fn next(&mut self) -> Option<RoleSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }
}
