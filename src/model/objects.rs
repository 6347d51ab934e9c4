use serde::{Deserialize, Serialize};
use std::fmt;

/// Versioned is any entity with an immutable id and an optimistic locking version.
pub trait Versioned: Clone {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Database,
    Queue,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Database => write!(f, "database"),
            EntityKind::Queue => write!(f, "queue"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub admin: bool,
    /// Ids of the databases this user may access.
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    pub owner: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    /// `<database>/<queue name>`
    pub id: String,
    #[serde(default)]
    pub version: u64,
    pub database: String,
    /// Bytes of message content retained before the oldest messages are dropped.
    pub max_size: u64,
    #[serde(default)]
    pub max_payload_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

macro_rules! impl_versioned {
    ($ty:ty, $kind:expr) => {
        impl Versioned for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

impl_versioned!(User, EntityKind::User);
impl_versioned!(Database, EntityKind::Database);
impl_versioned!(Queue, EntityKind::Queue);

/// ModelObject is any one of the repository's versioned entities. Equality of identity is by
/// (kind, id); use `PartialEq` to compare full values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelObject {
    User(User),
    Database(Database),
    Queue(Queue),
}

impl ModelObject {
    pub fn kind(&self) -> EntityKind {
        match self {
            ModelObject::User(_) => EntityKind::User,
            ModelObject::Database(_) => EntityKind::Database,
            ModelObject::Queue(_) => EntityKind::Queue,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ModelObject::User(o) => o.id(),
            ModelObject::Database(o) => o.id(),
            ModelObject::Queue(o) => o.id(),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            ModelObject::User(o) => o.version(),
            ModelObject::Database(o) => o.version(),
            ModelObject::Queue(o) => o.version(),
        }
    }

    pub fn same_identity(&self, other: &ModelObject) -> bool {
        self.kind() == other.kind() && self.id() == other.id()
    }
}

impl From<User> for ModelObject {
    fn from(o: User) -> Self {
        ModelObject::User(o)
    }
}

impl From<Database> for ModelObject {
    fn from(o: Database) -> Self {
        ModelObject::Database(o)
    }
}

impl From<Queue> for ModelObject {
    fn from(o: Queue) -> Self {
        ModelObject::Queue(o)
    }
}
