mod home;
mod image;
mod user;

pub use home::*;
pub use image::*;
pub use user::*;

use std::fmt::Display;

use crate::error::{AppError, AppResult};

/// Character-length bounds, inclusive
fn check_len(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::validation(
            field,
            format!("length must be between {} and {} characters", min, max),
        ));
    }
    Ok(())
}

fn check_opt_len(field: &str, value: Option<&String>, min: usize, max: usize) -> AppResult<()> {
    match value {
        Some(value) => check_len(field, value, min, max),
        None => Ok(()),
    }
}

fn check_range<T: PartialOrd + Display>(field: &str, value: T, min: T, max: T) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::validation(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

fn check_choice(field: &str, value: &str, choices: &[&str]) -> AppResult<()> {
    if !choices.contains(&value) {
        return Err(AppError::validation(
            field,
            format!("must be one of: {}", choices.join(", ")),
        ));
    }
    Ok(())
}
