//! Result type aliases for Caseflow.

use crate::CaseflowError;

/// A specialized `Result` type for Caseflow operations.
pub type CaseflowResult<T> = Result<T, CaseflowError>;
