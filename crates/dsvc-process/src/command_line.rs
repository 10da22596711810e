//! Command-line construction.
//!
//! Windows hands a child process a single command-line string. The server
//! scripts expect the same tokens back that we were given, so quoting is
//! kept minimal: only arguments with whitespace (that are not quoted yet) and
//! the empty argument get quotes.

/// Default maximum length of a command line, in characters.
pub const DEFAULT_MAX_COMMAND_LINE: usize = 32766;

/// Join `argv` into a single command line.
///
/// ```
/// use dsvc_process::build_command_line;
///
/// let argv = ["prog", "arg with space", "-flag", ""].map(String::from);
/// assert_eq!(build_command_line(&argv), r#"prog "arg with space" -flag """#);
/// ```
pub fn build_command_line<S: AsRef<str>>(argv: &[S]) -> String {
    let mut line = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        push_quoted(&mut line, arg.as_ref());
    }
    line
}

fn push_quoted(line: &mut String, arg: &str) {
    if arg.is_empty() {
        line.push_str("\"\"");
    } else if needs_quotes(arg) {
        line.push('"');
        line.push_str(arg);
        line.push('"');
    } else {
        line.push_str(arg);
    }
}

fn needs_quotes(arg: &str) -> bool {
    arg.chars().any(char::is_whitespace) && !is_quoted(arg)
}

fn is_quoted(arg: &str) -> bool {
    arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"')
}
