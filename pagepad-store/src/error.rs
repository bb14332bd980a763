#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("page not found: {0}")]
  PageNotFound(String),

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}
