//! Line protocol for the daemon's stdin.
//!
//! | Line | Effect |
//! |------|--------|
//! | `{...}` | evaluate the JSON payload, print the Decision |
//! | `:correct <fingerprint> <user> <decision json>` | store a correction |
//! | `:get <fingerprint>` | print the stored correction, or `null` |
//! | `:approve <id>` / `:decline <id>` | answer a pending approval |
//! | `:pending` | list pending approvals |
//! | `:laws` | print the law summary table |

use directive_core::{Decision, Fingerprint};

#[derive(Debug, PartialEq)]
pub enum Command {
    Process(serde_json::Value),
    Correct {
        fingerprint: Fingerprint,
        user: String,
        decision: Decision,
    },
    Get(Fingerprint),
    Respond { id: String, approved: bool },
    Pending,
    Laws,
}

pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if !line.starts_with(':') {
        return serde_json::from_str(line)
            .map(|v| Some(Command::Process(v)))
            .map_err(|e| format!("invalid JSON payload: {}", e));
    }

    let mut parts = line[1..].splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match verb {
        "correct" => {
            let mut args = rest.splitn(3, char::is_whitespace);
            let (Some(fp), Some(user), Some(json)) = (args.next(), args.next(), args.next()) else {
                return Err("usage: :correct <fingerprint> <user> <decision json>".to_string());
            };
            let decision: Decision =
                serde_json::from_str(json.trim()).map_err(|e| format!("invalid decision: {}", e))?;
            Ok(Some(Command::Correct {
                fingerprint: Fingerprint::from_hex(fp),
                user: user.to_string(),
                decision,
            }))
        }
        "get" if !rest.is_empty() => Ok(Some(Command::Get(Fingerprint::from_hex(rest)))),
        "approve" if !rest.is_empty() => Ok(Some(Command::Respond {
            id: rest.to_string(),
            approved: true,
        })),
        "decline" if !rest.is_empty() => Ok(Some(Command::Respond {
            id: rest.to_string(),
            approved: false,
        })),
        "pending" => Ok(Some(Command::Pending)),
        "laws" => Ok(Some(Command::Laws)),
        other => Err(format!("unknown command :{} {}", other, rest).trim_end().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directive_core::Outcome;

    #[test]
    fn test_json_line_is_a_payload() {
        let cmd = parse(r#"{"order":"open website example.com"}"#).unwrap().unwrap();
        assert!(matches!(cmd, Command::Process(v) if v["order"] == "open website example.com"));
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("# note").unwrap(), None);
    }

    #[test]
    fn test_correct_command() {
        let line = r#":correct ABCD ops-lead {"outcome":"blocked","fingerprint":"abcd"}"#;
        let Some(Command::Correct { fingerprint, user, decision }) = parse(line).unwrap() else {
            panic!("expected correct command");
        };
        assert_eq!(fingerprint.as_str(), "abcd");
        assert_eq!(user, "ops-lead");
        assert_eq!(decision.outcome, Outcome::Blocked);
    }

    #[test]
    fn test_approval_commands() {
        assert_eq!(
            parse(":approve 42").unwrap(),
            Some(Command::Respond { id: "42".into(), approved: true })
        );
        assert_eq!(
            parse(":decline 42").unwrap(),
            Some(Command::Respond { id: "42".into(), approved: false })
        );
        assert!(parse(":approve").is_err());
        assert!(parse(":launch now").is_err());
    }
}
