//! Validation for operator-issued device commands.
//!
//! Only read-only query commands are ever forwarded to a device, and a
//! deny list blocks paths that could change device state or leak
//! credentials. A denied command is rejected outright, never retried.

/// Path prefixes that are never forwarded, regardless of action.
const DENIED_PATH_PREFIXES: &[&str] = &[
    "/tool/fetch",
    "/tool/mac-server",
    "/ip/service",
    "/system/reset-configuration",
    "/system/shutdown",
    "/system/reboot",
    "/system/script",
    "/user",
    "/certificate",
];

/// Actions that map to a read-only query.
const ALLOWED_ACTIONS: &[&str] = &["print", "get", "find", "export"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty or malformed command")]
    Invalid,

    #[error("invalid path component: {0}")]
    InvalidPathComponent(String),

    #[error("action not allowed: {0}")]
    ActionNotAllowed(String),

    /// Security rejection: no retry, no fallback.
    #[error("command is not allowed for security reasons")]
    Denied,
}

/// A validated, read-only command ready to run against a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Normalized resource path (e.g., `/ip/firewall/nat`).
    pub path: String,
    /// The read-only action requested.
    pub action: String,
}

/// Parses and validates a CLI-style command such as
/// `/ip/firewall/nat/print` or `/ip firewall nat print`.
pub fn validate_command(command: &str) -> Result<CommandRequest, CommandError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(CommandError::Invalid);
    }

    let mut path_parts: Vec<String> = Vec::new();
    let mut action: Option<String> = None;

    for token in command.split_whitespace() {
        if let Some(stripped) = token.strip_prefix('/') {
            for part in stripped.split('/').filter(|p| !p.is_empty()) {
                path_parts.push(part.to_string());
            }
        } else if action.is_none() && path_parts.is_empty() {
            // Bare path segment before any slash form
            path_parts.push(token.to_string());
        } else if action.is_none() {
            action = Some(token.to_string());
        }
    }

    // The slash form carries the action as the trailing path segment
    if action.is_none() {
        if let Some(last) = path_parts.last() {
            if ALLOWED_ACTIONS.contains(&last.as_str()) {
                action = path_parts.pop();
            }
        }
    }

    if path_parts.is_empty() {
        return Err(CommandError::Invalid);
    }

    for part in &path_parts {
        let valid = part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CommandError::InvalidPathComponent(part.clone()));
        }
    }

    let path = format!("/{}", path_parts.join("/"));

    for prefix in DENIED_PATH_PREFIXES {
        if path == *prefix || path.starts_with(&format!("{prefix}/")) {
            return Err(CommandError::Denied);
        }
    }

    let action = action.unwrap_or_else(|| "print".to_string());
    if !ALLOWED_ACTIONS.contains(&action.as_str()) {
        return Err(CommandError::ActionNotAllowed(action));
    }

    Ok(CommandRequest { path, action })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_form_with_trailing_action() {
        let cmd = validate_command("/ip/firewall/nat/print").unwrap();
        assert_eq!(cmd.path, "/ip/firewall/nat");
        assert_eq!(cmd.action, "print");
    }

    #[test]
    fn parses_space_form() {
        let cmd = validate_command("/ip/firewall/nat print").unwrap();
        assert_eq!(cmd.path, "/ip/firewall/nat");
        assert_eq!(cmd.action, "print");
    }

    #[test]
    fn defaults_to_print_action() {
        let cmd = validate_command("/interface").unwrap();
        assert_eq!(cmd.path, "/interface");
        assert_eq!(cmd.action, "print");
    }

    #[test]
    fn denied_paths_are_rejected_outright() {
        assert_eq!(
            validate_command("/system/reboot"),
            Err(CommandError::Denied)
        );
        assert_eq!(
            validate_command("/user/add name=evil"),
            Err(CommandError::Denied)
        );
        assert_eq!(
            validate_command("/tool/fetch/print"),
            Err(CommandError::Denied)
        );
        assert_eq!(
            validate_command("/ip/service print"),
            Err(CommandError::Denied)
        );
    }

    #[test]
    fn mutating_actions_are_rejected() {
        let err = validate_command("/ip/firewall/filter remove").unwrap_err();
        assert_eq!(err, CommandError::ActionNotAllowed("remove".to_string()));
    }

    #[test]
    fn bad_path_components_are_rejected() {
        assert!(matches!(
            validate_command("/ip/fire;wall print"),
            Err(CommandError::InvalidPathComponent(_))
        ));
        assert_eq!(validate_command(""), Err(CommandError::Invalid));
        assert_eq!(validate_command("   "), Err(CommandError::Invalid));
    }

    #[test]
    fn path_prefix_matching_does_not_overreach() {
        // /users is not /user
        let cmd = validate_command("/users/print");
        assert!(cmd.is_ok());
    }
}
