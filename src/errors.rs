use thiserror::Error;

/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
pub const NO_ROWS_CODE: &str = "PGRST116";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("This email address is already registered. Please use a different email or try logging in.")]
    EmailAlreadyRegistered,

    #[error("This phone number is already registered. Please use a different phone number.")]
    PhoneAlreadyRegistered,

    #[error("User creation failed")]
    UserCreationFailed,

    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("identity provider error: {message}")]
    Identity {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("store error on '{table}': {message}")]
    Store {
        table: String,
        code: Option<String>,
        message: String,
    },

    #[error("realtime error: {0}")]
    Realtime(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn store(table: &str, message: impl Into<String>) -> Self {
        AppError::Store {
            table: table.to_string(),
            code: None,
            message: message.into(),
        }
    }

    pub fn no_rows(table: &str) -> Self {
        AppError::Store {
            table: table.to_string(),
            code: Some(NO_ROWS_CODE.to_string()),
            message: "JSON object requested, multiple (or no) rows returned".to_string(),
        }
    }

    /// Backend error code, when the provider sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            AppError::Identity { code, .. } | AppError::Store { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True for the "no row" signal, which callers downgrade instead of failing.
    pub fn is_no_rows(&self) -> bool {
        self.code() == Some(NO_ROWS_CODE)
    }
}
