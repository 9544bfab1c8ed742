//! Engine error model.

use thiserror::Error;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error classification.
///
/// Callers (transport adapters, saga coordinators) branch on this instead of
/// matching on message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InsufficientStock,
    NoWarehouseAvailable,
    InvalidStateTransition,
    Conflict,
    Internal,
}

/// Engine-level error.
///
/// Every user-visible failure of a warehouse operation is one of these variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A warehouse, stock record, transfer or saga step is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Input failed validation (zero/negative quantity, `from == to`, malformed code...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation would break `stock >= locked >= 0`.
    #[error("insufficient stock for sku {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: String,
        requested: i64,
        available: i64,
    },

    /// No active warehouse can serve the requested quantity on its own.
    #[error("no warehouse available for sku {sku_id} (quantity {quantity})")]
    NoWarehouseAvailable { sku_id: String, quantity: i64 },

    /// A transfer action was attempted from a state that disallows it.
    #[error("transfer {transfer_id}: cannot {action} from {from}")]
    InvalidStateTransition {
        transfer_id: String,
        from: String,
        action: &'static str,
    },

    /// Concurrent modification detected (stale version, moved stock, reused key).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage or other infrastructure failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn insufficient(sku_id: impl ToString, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            sku_id: sku_id.to_string(),
            requested,
            available,
        }
    }

    pub fn no_warehouse(sku_id: impl ToString, quantity: i64) -> Self {
        Self::NoWarehouseAvailable {
            sku_id: sku_id.to_string(),
            quantity,
        }
    }

    pub fn invalid_transition(
        transfer_id: impl ToString,
        from: impl ToString,
        action: &'static str,
    ) -> Self {
        Self::InvalidStateTransition {
            transfer_id: transfer_id.to_string(),
            from: from.to_string(),
            action,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::NoWarehouseAvailable { .. } => ErrorKind::NoWarehouseAvailable,
            EngineError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_messages() {
        let a = EngineError::insufficient("sku-1", 10, 3);
        let b = EngineError::insufficient("sku-2", 1, 0);
        assert_eq!(a.kind(), ErrorKind::InsufficientStock);
        assert!(b.is(ErrorKind::InsufficientStock));
        assert!(!a.is(ErrorKind::Conflict));
    }

    #[test]
    fn display_names_the_sku() {
        let err = EngineError::insufficient("sku-9", 100, 10);
        assert_eq!(
            err.to_string(),
            "insufficient stock for sku sku-9: requested 100, available 10"
        );
    }
}
