use thiserror::Error;

#[derive(Error, Debug)]
pub enum LarderError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("credential expired")]
    TokenExpired,

    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LarderError {
    /// HTTP status for the API surface. Transport details stay in the logs.
    pub fn status_code(&self) -> u16 {
        match self {
            LarderError::Unauthorized | LarderError::TokenExpired => 401,
            LarderError::ListNotFound(_) | LarderError::ItemNotFound(_) => 404,
            LarderError::InvalidRequest(_) => 400,
            LarderError::Io(_) => 500,
        }
    }
}
