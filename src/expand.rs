//! Shell-style expansion for string-valued configuration fields.
//!
//! Configuration strings may embed `${NAME}`, `${NAME:-default}`, and
//! `$(command)` tokens. Expansion is a single left-to-right pass over the
//! input; substituted text is never re-scanned, so a variable value or
//! command output containing `$` syntax stays literal. This is deliberately
//! not a shell: only these three token forms are interpreted.

use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("unterminated expansion token '{token}'")]
    Unterminated { token: String },

    #[error("command substitution '$({token})' could not be spawned: {cause}")]
    Spawn {
        token: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("command substitution '$({token})' exited with {status}: {stderr}")]
    CommandFailed {
        token: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Expand all `${NAME}`, `${NAME:-default}`, and `$(command)` tokens in
/// `input` using `lookup` for variable values.
///
/// Unset plain `${NAME}` resolves to the empty string and is not an error.
/// `${NAME:-default}` falls back to the literal default when the variable is
/// unset or empty; the default itself is not expanded. `$(command)` runs the
/// command via `sh -c` and substitutes its captured stdout with trailing
/// newlines trimmed; a failed spawn or non-zero exit is an error.
pub fn expand<F>(input: &str, lookup: F) -> Result<String, ExpandError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos..];

        if let Some(body) = after.strip_prefix("${") {
            let Some(close) = body.find('}') else {
                return Err(ExpandError::Unterminated {
                    token: after.to_string(),
                });
            };
            out.push_str(&variable_value(&body[..close], &lookup));
            rest = &body[close + 1..];
        } else if let Some(body) = after.strip_prefix("$(") {
            let Some(close) = body.find(')') else {
                return Err(ExpandError::Unterminated {
                    token: after.to_string(),
                });
            };
            out.push_str(&command_output(&body[..close])?);
            rest = &body[close + 1..];
        } else {
            // Lone '$' with no recognized opener stays literal.
            out.push('$');
            rest = &after[1..];
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Expand against the current process environment.
pub fn expand_env(input: &str) -> Result<String, ExpandError> {
    expand(input, |name| std::env::var(name).ok())
}

fn variable_value<F>(body: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match body.split_once(":-") {
        Some((name, default)) => lookup(name)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string()),
        None => lookup(body).unwrap_or_default(),
    }
}

fn command_output(token: &str) -> Result<String, ExpandError> {
    let output = Command::new("sh")
        .args(["-c", token])
        .output()
        .map_err(|cause| ExpandError::Spawn {
            token: token.to_string(),
            cause,
        })?;

    if !output.status.success() {
        return Err(ExpandError::CommandFailed {
            token: token.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn literal_string_is_unchanged() {
        let input = "-m 4G -smp 2";
        assert_eq!(expand(input, no_env).unwrap(), input);
    }

    #[test]
    fn plain_variable_resolves_or_is_empty() {
        let env = |name: &str| (name == "MODE").then(|| "microvm".to_string());
        assert_eq!(expand("mode=${MODE}", env).unwrap(), "mode=microvm");
        assert_eq!(expand("mode=${MISSING}", env).unwrap(), "mode=");
    }

    #[test]
    fn default_applies_when_unset_or_empty() {
        assert_eq!(expand("${SMP:-1}", no_env).unwrap(), "1");
        let empty = |name: &str| (name == "SMP").then(String::new);
        assert_eq!(expand("${SMP:-1}", empty).unwrap(), "1");
    }

    #[test]
    fn default_ignored_when_set() {
        let env = |name: &str| (name == "SMP").then(|| "8".to_string());
        assert_eq!(expand("${SMP:-1}", env).unwrap(), "8");
    }

    #[test]
    fn command_substitution_trims_trailing_newline() {
        let result = expand("$(echo -m 4G)", no_env).unwrap();
        assert_eq!(result, "-m 4G");
    }

    #[test]
    fn failing_command_is_an_error() {
        let err = expand("$(false)", no_env).unwrap_err();
        assert!(matches!(err, ExpandError::CommandFailed { .. }));
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let env = |name: &str| (name == "TRICK").then(|| "${INNER}".to_string());
        assert_eq!(expand("${TRICK}", env).unwrap(), "${INNER}");
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand("cost: 5$ each", no_env).unwrap(), "cost: 5$ each");
    }

    #[test]
    fn unterminated_token_is_an_error() {
        assert!(matches!(
            expand("${OOPS", no_env),
            Err(ExpandError::Unterminated { .. })
        ));
        assert!(matches!(
            expand("$(oops", no_env),
            Err(ExpandError::Unterminated { .. })
        ));
    }

    #[test]
    fn tokens_expand_left_to_right() {
        let env = |name: &str| match name {
            "A" => Some("first".to_string()),
            "B" => Some("second".to_string()),
            _ => None,
        };
        assert_eq!(expand("${A} then ${B}", env).unwrap(), "first then second");
    }
}
