use crate::model::ModelObject;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxOperation {
    Create,
    Update,
    Delete,
}

/// Tx is one create, update or delete of one versioned object. It is the unit of replication.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
    pub operation: TxOperation,
    pub object: ModelObject,
    /// Caller supplied idempotency key. A transaction whose request id was already committed
    /// is not executed again; the original tx id is returned instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Tx {
    pub fn create(object: impl Into<ModelObject>) -> Self {
        Self::new(TxOperation::Create, object.into())
    }

    pub fn update(object: impl Into<ModelObject>) -> Self {
        Self::new(TxOperation::Update, object.into())
    }

    pub fn delete(object: impl Into<ModelObject>) -> Self {
        Self::new(TxOperation::Delete, object.into())
    }

    fn new(operation: TxOperation, object: ModelObject) -> Self {
        Tx {
            operation,
            object,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    #[test]
    fn tx_json_shape() {
        let tx = Tx::create(User {
            id: "alice".into(),
            ..User::default()
        });

        let json: serde_json::Value = serde_json::from_slice(&tx.to_json().unwrap()).unwrap();
        assert_eq!(json["operation"], "CREATE");
        assert_eq!(json["object"]["type"], "user");
        assert!(json.get("requestId").is_none());

        let with_id = tx.with_request_id("r-1");
        let json: serde_json::Value = serde_json::from_slice(&with_id.to_json().unwrap()).unwrap();
        assert_eq!(json["requestId"], "r-1");
    }
}
