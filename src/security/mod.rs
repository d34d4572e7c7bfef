//! Security checks
//!
//! This module provides:
//! - Input validation for peer names and contact emails
//! - Safe file names for generated client configurations
//! - Permission checks on key-bearing files
//! - Privilege detection for commands that touch the interface

mod permissions;
mod privileges;
mod validation;

pub use permissions::validate_private_file;
pub use privileges::{warn_if_unprivileged, PrivilegeLevel};
pub use validation::{safe_file_name, validate_email, validate_peer_name, MAX_NAME_LEN};
