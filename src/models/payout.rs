use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PayoutError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixKeyType {
    Cpf,
    Email,
    Phone,
    Random,
}

/// Where earnings are paid out. Card numbers never leave the form: only the
/// last four digits are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PayoutMethod {
    Pix { key_type: PixKeyType, key: String },
    Card { last_four: String, expiry: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayoutDetails {
    pub driver_id: Uuid,
    pub account_holder_name: String,
    pub cpf: Option<String>,
    #[serde(flatten)]
    pub method: PayoutMethod,
}

/// Raw input as the driver typed it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PayoutForm {
    Pix {
        account_holder_name: String,
        key_type: PixKeyType,
        key: String,
    },
    Card {
        card_holder_name: String,
        card_number: String,
        expiry_date: String,
        cpf: String,
    },
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn checked_cpf(raw: &str) -> Result<String, PayoutError> {
    let cpf = digits(raw);
    if cpf.len() != 11 {
        return Err(PayoutError::InvalidCpf);
    }
    Ok(cpf)
}

fn checked_holder(raw: &str) -> Result<String, PayoutError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(PayoutError::MissingHolderName);
    }
    Ok(name.to_string())
}

/// `MM/YY`.
fn checked_expiry(raw: &str) -> Result<String, PayoutError> {
    let raw = raw.trim();
    let valid = match raw.split_once('/') {
        Some((month, year)) => {
            month.len() == 2
                && year.len() == 2
                && year.chars().all(|c| c.is_ascii_digit())
                && month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m))
        }
        None => false,
    };

    if !valid {
        return Err(PayoutError::InvalidExpiry(raw.to_string()));
    }
    Ok(raw.to_string())
}

impl PayoutDetails {
    pub fn from_form(driver_id: Uuid, form: PayoutForm) -> Result<Self, PayoutError> {
        match form {
            PayoutForm::Pix {
                account_holder_name,
                key_type,
                key,
            } => {
                let key = match key_type {
                    PixKeyType::Cpf => checked_cpf(&key)?,
                    PixKeyType::Phone => digits(&key),
                    PixKeyType::Email | PixKeyType::Random => key.trim().to_string(),
                };
                if key.is_empty() {
                    return Err(PayoutError::MissingPixKey);
                }

                Ok(Self {
                    driver_id,
                    account_holder_name: checked_holder(&account_holder_name)?,
                    cpf: (key_type == PixKeyType::Cpf).then(|| key.clone()),
                    method: PayoutMethod::Pix { key_type, key },
                })
            }
            PayoutForm::Card {
                card_holder_name,
                card_number,
                expiry_date,
                cpf,
            } => {
                let number = digits(&card_number);
                if !(12..=19).contains(&number.len()) {
                    return Err(PayoutError::InvalidCardNumber);
                }

                Ok(Self {
                    driver_id,
                    account_holder_name: checked_holder(&card_holder_name)?,
                    cpf: Some(checked_cpf(&cpf)?),
                    method: PayoutMethod::Card {
                        last_four: number[number.len() - 4..].to_string(),
                        expiry: checked_expiry(&expiry_date)?,
                    },
                })
            }
        }
    }
}
