use crate::classifier::ClassifiedError;
use forge_types::TxHash;
use serde::{Deserialize, Serialize};

/// Result type of every public service operation
pub type ServiceResult<T> = std::result::Result<T, ClassifiedError>;

/// The chain accepted a transaction but the database projection did not
/// follow. Funds moved; the record catches up through reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookkeepingWarning {
    pub tx_hash: TxHash,
    pub error: ClassifiedError,
}

/// Successful outcome that may carry a bookkeeping warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completed<T> {
    pub value: T,
    pub bookkeeping: Option<BookkeepingWarning>,
}

impl<T> Completed<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            bookkeeping: None,
        }
    }

    pub fn lagging(value: T, tx_hash: TxHash, error: ClassifiedError) -> Self {
        Self {
            value,
            bookkeeping: Some(BookkeepingWarning { tx_hash, error }),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.bookkeeping.is_none()
    }
}

/// Wire shape `{success, data?, error?, warning?}` handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<BookkeepingWarning>,
}

impl<T> From<ServiceResult<T>> for ServiceResponse<T> {
    fn from(result: ServiceResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
                warning: None,
            },
            Err(error) => Self {
                success: false,
                data: None,
                error: Some(error),
                warning: None,
            },
        }
    }
}

impl<T> ServiceResponse<T> {
    /// Like the `From` conversion, but surfaces a bookkeeping warning
    pub fn from_completed(result: ServiceResult<Completed<T>>) -> Self {
        match result {
            Ok(done) => Self {
                success: true,
                data: Some(done.value),
                error: None,
                warning: done.bookkeeping,
            },
            Err(error) => Self {
                success: false,
                data: None,
                error: Some(error),
                warning: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_message;

    #[test]
    fn test_response_shape() {
        let ok: ServiceResponse<u32> = ServiceResult::Ok(7).into();
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 7}));

        let failed: ServiceResponse<u32> =
            ServiceResult::Err(classify_message("execution reverted")).into();
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "transaction_reverted");
        assert_eq!(json["error"]["category"], "blockchain");
    }

    #[test]
    fn test_lagging_success_keeps_warning() {
        let hash = TxHash::from_bytes([3u8; 32]);
        let done = Completed::lagging("ok", hash.clone(), classify_message("database offline"));
        assert!(!done.is_clean());
        let response = ServiceResponse::from_completed(Ok(done));
        assert!(response.success);
        assert_eq!(response.warning.unwrap().tx_hash, hash);
    }
}
