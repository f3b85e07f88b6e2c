//! Validation modules

pub mod nhs_number;

pub use nhs_number::{mask_nhs_number, validate_nhs_number, NHS_NUMBER_LENGTH};
