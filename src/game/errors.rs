use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by gameplay services.
#[derive(Debug, Error)]
pub enum GameError {
    /// Wrapper around document store failures.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Player, item or department document that the action needs is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Balance too low for the requested amount.
    #[error("insufficient {currency}: need {needed}, have {available}")]
    InsufficientFunds {
        currency: &'static str,
        needed: i64,
        available: i64,
    },

    #[error("insufficient stock for {item}: need {needed}, have {available}")]
    InsufficientStock {
        item: String,
        needed: u32,
        available: u32,
    },

    /// Hourly casino allowance used up.
    #[error("rate limit exceeded: {used}/{limit} plays this hour")]
    RateLimitExceeded { used: u32, limit: u32 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown department: {0}")]
    UnknownDepartment(String),

    /// Academy departments take no part in the crime simulation.
    #[error("department {0} is exempt from crime tracking")]
    AcademyExempt(String),

    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// Player may not perform the action (not graduated, no department).
    #[error("not eligible: {0}")]
    NotEligible(String),
}

impl GameError {
    /// Message shown to the player. Internal error text only goes to logs.
    pub fn user_message(&self) -> String {
        match self {
            GameError::Store(e) if e.is_transient() => {
                "Server ei vasta. Proovi mõne aja pärast uuesti.".to_string()
            }
            GameError::Store(StoreError::NotFound { .. }) | GameError::NotFound(_) => {
                "Andmeid ei leitud.".to_string()
            }
            GameError::Store(_) => "Tekkis viga. Proovi uuesti.".to_string(),
            GameError::InsufficientFunds {
                currency, needed, ..
            } => match *currency {
                "pollid" => format!("Sul pole piisavalt pollide ({needed} vaja)."),
                _ => format!("Sul pole piisavalt raha ({needed}€ vaja)."),
            },
            GameError::InsufficientStock { available, .. } => {
                format!("Laos pole piisavalt kaupa (saadaval {available}).")
            }
            GameError::RateLimitExceeded { limit, .. } => {
                format!("Oled selle tunni {limit} mängu ära kasutanud. Tule järgmisel tunnil tagasi.")
            }
            GameError::InvalidAmount(_) => "Vigane kogus.".to_string(),
            GameError::UnknownDepartment(name) => format!("Tundmatu osakond: {name}."),
            GameError::AcademyExempt(_) => {
                "Sisekaitseakadeemias kuritegevuse taset ei arvestata.".to_string()
            }
            GameError::UnknownItem(_) => "Sellist eset poes ei ole.".to_string(),
            GameError::NotEligible(_) => "Sul pole selleks õigust.".to_string(),
        }
    }
}
