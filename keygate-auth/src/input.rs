//! Request input validation.
//!
//! Everything here runs before any store access. The shape rules mirror
//! what the public endpoints accept: RFC-style emails, alphanumeric
//! usernames, passwords with enforced character-class variety, and
//! fixed-width hex tokens.

use serde::Deserialize;
use validator::{Validate, ValidateEmail};

use crate::error::AuthError;

/// Password length bounds.
const PASSWORD_MIN: usize = 10;
const PASSWORD_MAX: usize = 128;

/// Username length bound.
const USERNAME_MAX: usize = 50;

/// One-time tokens are 20 random bytes rendered as hex.
const TOKEN_HEX_LEN: usize = 40;

/// Registration payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterInput {
    /// Login email address.
    #[validate(length(min = 3, max = 254), email)]
    pub email: String,
    /// Display name.
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    /// Plaintext password, validated for strength separately.
    pub password: String,
}

impl RegisterInput {
    /// Run every rule, returning the payload on success.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::InputValidation`] naming the offending
    /// field.
    pub fn validated(self) -> Result<Self, AuthError> {
        self.validate()?;
        ensure_username(&self.username)?;
        ensure_password(&self.password)?;
        Ok(self)
    }
}

/// Local login payload.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    /// Login email address.
    #[validate(length(min = 3, max = 254), email)]
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

impl LoginInput {
    /// Run every rule, returning the payload on success.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::InputValidation`] naming the offending
    /// field.
    pub fn validated(self) -> Result<Self, AuthError> {
        self.validate()?;
        ensure_password(&self.password)?;
        Ok(self)
    }
}

/// Validate a bare email address.
///
/// # Errors
///
/// Fails with [`AuthError::InputValidation`].
pub fn ensure_email(email: &str) -> Result<(), AuthError> {
    if email.len() < 3 || email.len() > 254 || !email.validate_email() {
        return Err(AuthError::InputValidation("email".to_owned()));
    }
    Ok(())
}

/// Validate a username: non-empty, bounded, alphanumeric.
///
/// # Errors
///
/// Fails with [`AuthError::InputValidation`].
pub fn ensure_username(username: &str) -> Result<(), AuthError> {
    if username.is_empty()
        || username.len() > USERNAME_MAX
        || !username.chars().all(char::is_alphanumeric)
    {
        return Err(AuthError::InputValidation("username".to_owned()));
    }
    Ok(())
}

/// Validate password strength: bounded length plus at least one lowercase
/// letter, one uppercase letter, one digit, and one punctuation character.
///
/// # Errors
///
/// Fails with [`AuthError::InputValidation`].
pub fn ensure_password(password: &str) -> Result<(), AuthError> {
    let length_ok = (PASSWORD_MIN..=PASSWORD_MAX).contains(&password.chars().count());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| c.is_ascii_punctuation());

    if length_ok && has_lower && has_upper && has_digit && has_symbol {
        Ok(())
    } else {
        Err(AuthError::InputValidation("password".to_owned()))
    }
}

/// Validate the shape of a one-time token taken from a link.
///
/// # Errors
///
/// Fails with [`AuthError::InputValidation`].
pub fn ensure_token_shape(token: &str) -> Result<(), AuthError> {
    if token.len() != TOKEN_HEX_LEN || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AuthError::InputValidation("token".to_owned()));
    }
    Ok(())
}
