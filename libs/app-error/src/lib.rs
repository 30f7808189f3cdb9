use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Internal(#[from] anyhow::Error),

  /// The target resource does not exist. Never cached.
  #[error("Record not found:{0}")]
  RecordNotFound(String),

  /// Resource kind outside of `file` / `folder` where a storage resource is required.
  #[error("Invalid resource kind:{0}")]
  InvalidKind(String),

  /// Writing a resolved decision into the permission cache failed.
  #[error("Permission cache write failed:{0}")]
  StoreWriteFailure(String),

  #[error("Invalid request:{0}")]
  InvalidRequest(String),

  #[error("Database error:{0}")]
  DBError(String),

  #[cfg(feature = "sqlx_error")]
  #[error("{0}")]
  SqlxError(String),

  #[error(transparent)]
  SerdeError(#[from] serde_json::Error),
}

impl AppError {
  pub fn is_record_not_found(&self) -> bool {
    matches!(self, AppError::RecordNotFound(_))
  }

  pub fn is_invalid_kind(&self) -> bool {
    matches!(self, AppError::InvalidKind(_))
  }

  pub fn is_store_write_failure(&self) -> bool {
    matches!(self, AppError::StoreWriteFailure(_))
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      AppError::Internal(_) => ErrorCode::Internal,
      AppError::RecordNotFound(_) => ErrorCode::RecordNotFound,
      AppError::InvalidKind(_) => ErrorCode::InvalidKind,
      AppError::StoreWriteFailure(_) => ErrorCode::StoreWriteFailure,
      AppError::InvalidRequest(_) => ErrorCode::InvalidRequest,
      AppError::DBError(_) => ErrorCode::DBError,
      #[cfg(feature = "sqlx_error")]
      AppError::SqlxError(_) => ErrorCode::SqlxError,
      AppError::SerdeError(_) => ErrorCode::SerdeError,
    }
  }
}

#[cfg(feature = "sqlx_error")]
impl From<sqlx::Error> for AppError {
  fn from(value: sqlx::Error) -> Self {
    let msg = value.to_string();
    match value {
      sqlx::Error::RowNotFound => {
        AppError::RecordNotFound(format!("Record not exist in db. {})", msg))
      },
      _ => AppError::SqlxError(msg),
    }
  }
}

#[derive(
  Eq,
  PartialEq,
  Copy,
  Debug,
  Clone,
  serde_repr::Serialize_repr,
  serde_repr::Deserialize_repr,
)]
#[repr(i32)]
pub enum ErrorCode {
  RecordNotFound = -2,
  DBError = 1005,
  InvalidRequest = 1008,
  Internal = 1017,
  #[cfg(feature = "sqlx_error")]
  SqlxError = 1020,
  SerdeError = 1022,
  InvalidKind = 1030,
  StoreWriteFailure = 1031,
}

impl ErrorCode {
  pub fn value(&self) -> i32 {
    *self as i32
  }
}
