//! Confirmation gate for destructive actions.

use std::io::{BufRead, Write};

use anyhow::{bail, Result};

/// How the user may confirm an action.
#[derive(Debug, Clone, Default)]
pub struct ConfirmOptions<'a> {
    /// `--force` skips the gate entirely.
    pub force: bool,
    /// `--confirm` value, which must equal the action name.
    pub token: Option<&'a str>,
    /// `--no-input` forbids prompting.
    pub no_input: bool,
    /// Whether stdin is a terminal.
    pub interactive: bool,
}

/// Require confirmation for `action`, prompting on `output` and reading the
/// answer from `input` when allowed.
pub fn require<R: BufRead, W: Write>(
    action: &str,
    options: &ConfirmOptions<'_>,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    if options.force {
        return Ok(());
    }
    if let Some(token) = options.token.filter(|t| !t.is_empty()) {
        if token == action {
            return Ok(());
        }
        bail!("--confirm must equal {action:?}");
    }
    if options.no_input || !options.interactive {
        bail!("confirmation required: pass --force or --confirm={action}");
    }

    write!(output, "Type {action:?} to confirm: ")?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        bail!("confirmation aborted");
    }
    if answer.trim() != action {
        bail!("confirmation did not match");
    }
    Ok(())
}
