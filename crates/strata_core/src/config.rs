//! Process-wide text comparison configuration.
//!
//! # Responsibility
//! - Hold the default case/diacritic sensitivity applied to text comparisons.
//! - Allow one explicit initialization per process, with conflict rejection.
//!
//! # Invariants
//! - Defaults are immutable once read or initialized.
//! - Without explicit init, comparisons are case- and diacritic-insensitive.
//!
//! Individual comparisons can still override these defaults through
//! [`crate::query::predicate::Field::compare_with`].

use crate::query::predicate::TextOptions;
use once_cell::sync::OnceCell;

static TEXT_DEFAULTS: OnceCell<TextOptions> = OnceCell::new();

/// Initializes the process-wide text comparison defaults.
///
/// # Invariants
/// - Calling repeatedly with the same options is idempotent.
/// - Conflicting re-initialization is rejected with an error.
/// - Initialization after the defaults were already read is rejected when
///   the requested options differ from the implicit default.
pub fn init_text_comparison(options: TextOptions) -> Result<(), String> {
    let active = *TEXT_DEFAULTS.get_or_init(|| options);
    if active != options {
        return Err(format!(
            "text comparison defaults already fixed to {active:?}; refusing to switch to {options:?}"
        ));
    }
    Ok(())
}

/// Returns the active text comparison defaults.
///
/// Reading the defaults fixes them for the process lifetime; both
/// insensitivity flags are on when no explicit init happened first.
pub fn text_comparison_defaults() -> TextOptions {
    *TEXT_DEFAULTS.get_or_init(TextOptions::insensitive)
}
