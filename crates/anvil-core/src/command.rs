//! Command token extraction and shell-like argument splitting.
//!
//! Pure functions used by the command-parsing middleware. Parsing never
//! fails: text that does not start with the command prefix simply yields
//! no command.

/// A command extracted from raw message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// The command token without prefix or `@mention` suffix, case
    /// preserved.
    pub command: String,
    /// Everything after the command token, untouched apart from trimming.
    pub payload: Option<String>,
    /// The payload split into shell-like arguments.
    pub args: Vec<String>,
}

/// Extracts a command from `text` when it starts with `prefix`.
///
/// The command token runs to the first whitespace; a trailing
/// `@mention` suffix (group-chat addressing) is stripped. The remainder
/// becomes the payload string and the shell-split argument list.
pub fn parse_command(text: &str, prefix: char) -> Option<ParsedCommand> {
    let rest = text.strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let token = parts.next().unwrap_or("");
    if token.is_empty() {
        return None;
    }

    let command = match token.split_once('@') {
        Some((name, _mention)) => name,
        None => token,
    };
    if command.is_empty() {
        return None;
    }

    let tail = parts.next().map(str::trim).filter(|t| !t.is_empty());
    Some(ParsedCommand {
        command: command.to_string(),
        payload: tail.map(str::to_string),
        args: tail.map(shell_split).unwrap_or_default(),
    })
}

/// Simple shell-like argument splitting.
///
/// Handles:
/// - Space/tab-separated arguments
/// - Quoted strings (single and double quotes)
/// - Backslash escapes of the next character inside quotes
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_single_quote || in_double_quote => {
                escape_next = true;
            }
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
            }
            ' ' | '\t' if !in_single_quote && !in_double_quote => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_split_simple() {
        let args = shell_split("hello world");
        assert_eq!(args, vec!["hello", "world"]);
    }

    #[test]
    fn test_shell_split_quoted() {
        let args = shell_split(r#""hello world" test"#);
        assert_eq!(args, vec!["hello world", "test"]);
    }

    #[test]
    fn test_shell_split_single_quoted() {
        let args = shell_split("'hello world' test");
        assert_eq!(args, vec!["hello world", "test"]);
    }

    #[test]
    fn test_shell_split_escaped_quote_inside_quotes() {
        let args = shell_split(r#""she said \"hi\"" 'it\'s'"#);
        assert_eq!(args, vec![r#"she said "hi""#, "it's"]);
    }

    #[test]
    fn test_shell_split_mixed_quotes() {
        let args = shell_split(r#""double's quote" 'single"s quote'"#);
        assert_eq!(args, vec!["double's quote", r#"single"s quote"#]);
    }

    #[test]
    fn test_shell_split_empty_and_whitespace() {
        assert!(shell_split("").is_empty());
        assert!(shell_split("   \t  ").is_empty());
    }

    #[test]
    fn test_parse_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello there", '/'), None);
        assert_eq!(parse_command("", '/'), None);
        assert_eq!(parse_command("/", '/'), None);
    }

    #[test]
    fn test_parse_command_with_quoted_args() {
        let parsed = parse_command(r#"/cmd "arg one" arg2"#, '/').unwrap();
        assert_eq!(parsed.command, "cmd");
        assert_eq!(parsed.args, vec!["arg one", "arg2"]);
        assert_eq!(parsed.payload.as_deref(), Some(r#""arg one" arg2"#));
    }

    #[test]
    fn test_parse_strips_mention_suffix() {
        let parsed = parse_command("/start@my_bot now", '/').unwrap();
        assert_eq!(parsed.command, "start");
        assert_eq!(parsed.args, vec!["now"]);
    }

    #[test]
    fn test_parse_preserves_case() {
        let parsed = parse_command("/Start", '/').unwrap();
        assert_eq!(parsed.command, "Start");
        assert!(parsed.args.is_empty());
        assert_eq!(parsed.payload, None);
    }

    #[test]
    fn test_parse_bare_command_has_no_payload() {
        let parsed = parse_command("/ping", '/').unwrap();
        assert_eq!(parsed.command, "ping");
        assert_eq!(parsed.payload, None);
        assert!(parsed.args.is_empty());
    }
}
