// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shell-command tokenizer for security classification.
//!
//! This is not a shell.  It understands just enough syntax (quoting,
//! pipes, sequencers, command substitution, variable assignments, shell
//! keywords) to answer two questions: which programs would this command
//! line run, and which files would it touch.  Malformed input is a parse
//! error, and the caller treats parse errors as a block.

use std::path::Path;

/// A parse failure.  The security gate fails safe on any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unclosed quote in command")]
    UnclosedQuote,
    #[error("unclosed command substitution")]
    UnclosedSubstitution,
}

/// One pipeline/sequencer segment: a single simple command and its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSegment {
    /// Basename of the program this segment invokes (empty for a bare
    /// assignment like `A=1` with no command).
    pub command: String,
    /// The segment's text with assignments stripped, e.g. `rm -rf /tmp/x`.
    pub text: String,
}

/// Shell keywords that never name a program.
const SHELL_KEYWORDS: [&str; 17] = [
    "if", "then", "else", "elif", "fi", "for", "select", "do", "done", "while", "until", "case",
    "esac", "in", "function", "!", "{",
];

/// Commands whose positional operands are treated as mutated paths.
const FILE_MUTATING_COMMANDS: [&str; 9] = [
    "cp", "mv", "rm", "rmdir", "mkdir", "chmod", "touch", "ln", "tee",
];

/// `rm` targets that are never acceptable, wildcarded or not.
const DANGEROUS_RM_TARGETS: [&str; 18] = [
    "/", "/*", "~", "~/", "..", "../*", ".", ".*", "*", "/etc", "/usr", "/home", "/var", "/bin",
    "/boot", "/dev", "/root", "/sys",
];

// ─── Tokenizer ────────────────────────────────────────────────────────────────

/// Split a command line into segments at top-level `|`, `;`, `&&`, `||`,
/// `&` and newlines, collecting nested `$(…)`/backtick bodies separately.
///
/// Quotes group; an unclosed quote or substitution is an error.
fn split_level(input: &str, nested: &mut Vec<String>) -> Result<Vec<String>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let quote = c;
                current.push(c);
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let q = chars[i];
                    current.push(q);
                    i += 1;
                    // backslash escapes only inside double quotes
                    if quote == '"' && q == '\\' && i < chars.len() {
                        current.push(chars[i]);
                        i += 1;
                        continue;
                    }
                    if q == quote {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(ParseError::UnclosedQuote);
                }
            }
            '\\' => {
                current.push(c);
                i += 1;
                if i < chars.len() {
                    current.push(chars[i]);
                    i += 1;
                }
            }
            '$' if i + 1 < chars.len() && chars[i + 1] == '(' => {
                // Find the matching close paren, accounting for nesting.
                let mut depth = 1;
                let mut j = i + 2;
                let start = j;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(ParseError::UnclosedSubstitution);
                }
                let inner: String = chars[start..j - 1].iter().collect();
                nested.push(inner);
                // The substitution result is opaque; keep a placeholder so
                // the outer token structure survives.
                current.push_str("SUBST");
                i = j;
            }
            '`' => {
                let mut j = i + 1;
                let start = j;
                while j < chars.len() && chars[j] != '`' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ParseError::UnclosedSubstitution);
                }
                let inner: String = chars[start..j].iter().collect();
                nested.push(inner);
                current.push_str("SUBST");
                i = j + 1;
            }
            '|' | '&' => {
                // `||` / `&&` / `|` / `&` all terminate the segment.
                segments.push(std::mem::take(&mut current));
                i += 1;
                if i < chars.len() && chars[i] == c {
                    i += 1;
                }
            }
            ';' | '\n' => {
                segments.push(std::mem::take(&mut current));
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    segments.push(current);
    Ok(segments)
}

/// Split a segment on whitespace, honouring quotes (which are stripped).
fn tokenize(segment: &str) -> Vec<String> {
    let chars: Vec<char> = segment.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let quote = c;
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if quote == '"' && chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    current.push(chars[i]);
                    i += 1;
                }
                i += 1; // closing quote (validated earlier)
            }
            '\\' => {
                i += 1;
                if i < chars.len() {
                    current.push(chars[i]);
                    i += 1;
                }
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// True for `NAME=value` environment assignments that may prefix a command.
fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.chars().next().is_some_and(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn basename(token: &str) -> String {
    Path::new(token)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| token.to_string())
}

// ─── Public classification API ────────────────────────────────────────────────

/// Break a command line into simple-command segments, recursing into
/// substitutions.  Segments with no command word (bare assignments,
/// empty branches of a sequencer) are omitted.
pub fn command_segments(input: &str) -> Result<Vec<CommandSegment>, ParseError> {
    let mut pending = vec![input.to_string()];
    let mut out = Vec::new();

    while let Some(level) = pending.pop() {
        let mut nested = Vec::new();
        for segment in split_level(&level, &mut nested)? {
            let tokens = tokenize(&segment);
            let mut rest = tokens.as_slice();
            while let Some(first) = rest.first() {
                if is_assignment(first) {
                    rest = &rest[1..];
                    continue;
                }
                if SHELL_KEYWORDS.contains(&first.as_str()) || first == "}" {
                    rest = &rest[1..];
                    continue;
                }
                break;
            }
            let Some(first) = rest.first() else { continue };
            if first == "SUBST" {
                // The segment's command comes from a substitution we cannot
                // evaluate; the nested body was queued for its own pass.
                continue;
            }
            out.push(CommandSegment {
                command: basename(first),
                text: rest.join(" "),
            });
        }
        pending.extend(nested);
    }
    Ok(out)
}

/// All program names (basenames) a command line would invoke, including
/// inside `$(…)` and backtick substitutions.
pub fn extract_commands(input: &str) -> Result<Vec<String>, ParseError> {
    Ok(command_segments(input)?
        .into_iter()
        .map(|s| s.command)
        .collect())
}

/// Paths a command line writes: operands of the file-mutating commands,
/// output-flag arguments (`curl -o`, `wget -O`, `unzip -d`) and
/// redirection targets.
pub fn extract_file_paths(input: &str) -> Vec<String> {
    let Ok(segments) = command_segments(input) else {
        return Vec::new();
    };
    let mut paths = Vec::new();

    for seg in &segments {
        let tokens = tokenize(&seg.text);
        if tokens.is_empty() {
            continue;
        }
        let cmd = basename(&tokens[0]);
        let args = &tokens[1..];

        if FILE_MUTATING_COMMANDS.contains(&cmd.as_str()) {
            let clean = without_redirections(args);
            let mut operands = clean.iter().filter(|t| !t.starts_with('-'));
            // chmod's first operand is the mode, not a path
            if cmd == "chmod" {
                operands.next();
            }
            paths.extend(operands.map(|t| t.to_string()));
        }

        let output_flags: &[&str] = match cmd.as_str() {
            "curl" => &["-o", "--output"],
            "wget" => &["-O", "--output-document"],
            "unzip" => &["-d"],
            _ => &[],
        };
        for flag in output_flags {
            let mut it = args.iter();
            while let Some(tok) = it.next() {
                if tok == flag {
                    if let Some(target) = it.next() {
                        paths.push(target.to_string());
                    }
                } else if let Some(target) = tok.strip_prefix(&format!("{flag}=")) {
                    paths.push(target.to_string());
                }
            }
        }
    }

    // Redirection targets are parsed from the raw input because the
    // segment text has already been whitespace-normalized.
    paths.extend(redirection_targets(input));
    paths.retain(|p| p != "SUBST" && !p.is_empty());
    paths
}

/// Drop redirection operators and their targets from an argument list;
/// the targets are collected separately by [`redirection_targets`].
fn without_redirections(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let stripped = arg
            .trim_start_matches('&')
            .trim_start_matches(|c: char| c.is_ascii_digit());
        if stripped.starts_with('>') || stripped.starts_with('<') {
            // a bare operator consumes the following token as its target
            if stripped.trim_start_matches(['>', '<', '&']).is_empty() && i + 1 < args.len() {
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }
        out.push(arg.clone());
        i += 1;
    }
    out
}

/// Operands of `>`, `>>`, `2>` and `&>` redirections.
fn redirection_targets(input: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let tokens = tokenize(input);
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        let stripped = tok
            .trim_start_matches('&')
            .trim_start_matches(|c: char| c.is_ascii_digit());
        if let Some(rest) = stripped.strip_prefix('>') {
            let rest = rest.trim_start_matches('>');
            if rest.is_empty() {
                if let Some(next) = tokens.get(i + 1) {
                    targets.push(next.clone());
                    i += 2;
                    continue;
                }
            } else if !rest.starts_with('&') {
                // attached form: `>file`, `2>>file`
                targets.push(rest.to_string());
            }
        }
        i += 1;
    }
    targets
}

// ─── rm / kill validation ─────────────────────────────────────────────────────

/// Reject `rm` invocations that could destroy the host.
///
/// `segment` is a single simple command whose program is `rm`.
pub fn validate_rm(segment: &str) -> Result<(), String> {
    let tokens = tokenize(segment);
    let args = tokens.iter().skip(1);

    let mut recursive = false;
    let mut targets: Vec<&str> = Vec::new();
    for arg in args {
        if arg == "--" {
            continue;
        }
        if let Some(flags) = arg.strip_prefix('-').filter(|_| arg != "-") {
            if arg == "--recursive"
                || (!arg.starts_with("--") && flags.chars().any(|c| c == 'r' || c == 'R'))
            {
                recursive = true;
            }
            if arg.starts_with("--")
                || (arg.len() > 1 && flags.chars().all(|c| c.is_alphabetic()))
            {
                continue;
            }
        }
        targets.push(arg);
    }

    if targets.is_empty() {
        return Err("rm with no target".to_string());
    }
    for target in &targets {
        let trimmed = target.trim_end_matches('/');
        let candidate = if trimmed.is_empty() { *target } else { trimmed };
        if DANGEROUS_RM_TARGETS.contains(&candidate) || DANGEROUS_RM_TARGETS.contains(target) {
            return Err(format!("rm target '{target}' is a protected path"));
        }
        if recursive && target.contains('*') {
            let hidden = Path::new(target)
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return Err(format!(
                    "recursive rm of hidden-file glob '{target}' is not allowed"
                ));
            }
            return Err(format!(
                "recursive rm with wildcard target '{target}' is not allowed"
            ));
        }
    }
    Ok(())
}

/// Reject `kill` invocations that target init, process groups, or
/// low-numbered system processes.
pub fn validate_kill(segment: &str) -> Result<(), String> {
    let tokens = tokenize(segment);
    let args: Vec<&String> = tokens.iter().skip(1).collect();

    let mut pids: Vec<i64> = Vec::new();
    let mut i = 0;
    let mut after_separator = false;
    while i < args.len() {
        let arg = args[i].as_str();
        if !after_separator {
            match arg {
                "-l" | "--list" => return Ok(()),
                "-s" | "--signal" => {
                    i += 2;
                    continue;
                }
                "--" => {
                    after_separator = true;
                    i += 1;
                    continue;
                }
                _ if arg.starts_with('-') && arg.len() > 1 => {
                    // `-9`, `-TERM`, `-SIGKILL` are signal flags
                    i += 1;
                    continue;
                }
                _ => {}
            }
        }
        match arg.parse::<i64>() {
            Ok(pid) => pids.push(pid),
            Err(_) => return Err(format!("kill target '{arg}' is not a PID")),
        }
        i += 1;
    }

    if pids.is_empty() {
        return Err("kill with no PID".to_string());
    }
    for pid in pids {
        if pid == 1 {
            return Err("kill of PID 1 is not allowed".to_string());
        }
        if pid < 0 {
            return Err(format!("kill of process group {pid} is not allowed"));
        }
        if pid < 100 {
            return Err(format!("kill of system process {pid} is not allowed"));
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(s: &str) -> Vec<String> {
        extract_commands(s).unwrap()
    }

    // ── extract_commands ──────────────────────────────────────────────────────

    #[test]
    fn single_command() {
        assert_eq!(commands("ls -la"), vec!["ls"]);
    }

    #[test]
    fn pipe_yields_both_commands() {
        assert_eq!(commands("echo hello | grep hello"), vec!["echo", "grep"]);
    }

    #[test]
    fn sequencers_yield_all_commands() {
        assert_eq!(commands("ls; pwd && date || true"), vec!["ls", "pwd", "date", "true"]);
    }

    #[test]
    fn path_prefix_is_stripped_to_basename() {
        assert_eq!(commands("/usr/bin/env ls"), vec!["env"]);
    }

    #[test]
    fn assignment_prefix_is_skipped() {
        assert_eq!(commands("VAR=1 ls"), vec!["ls"]);
        assert_eq!(commands("A=1 B=2 cargo build"), vec!["cargo"]);
    }

    #[test]
    fn bare_assignment_yields_no_command() {
        assert!(commands("VAR=1").is_empty());
    }

    #[test]
    fn shell_keywords_are_skipped() {
        let got = commands("if true; then ls; fi");
        assert_eq!(got, vec!["true", "ls"]);
    }

    #[test]
    fn while_loop_keywords_are_skipped() {
        let got = commands("while sleep 1; do date; done");
        assert_eq!(got, vec!["sleep", "date"]);
    }

    #[test]
    fn substitution_commands_are_extracted() {
        let got = commands("echo $(date)");
        assert!(got.contains(&"echo".to_string()));
        assert!(got.contains(&"date".to_string()));
    }

    #[test]
    fn nested_substitution_commands_are_extracted() {
        let got = commands("echo $(cat $(which ls))");
        assert!(got.contains(&"cat".to_string()));
        assert!(got.contains(&"which".to_string()));
    }

    #[test]
    fn backtick_commands_are_extracted() {
        let got = commands("echo `hostname`");
        assert!(got.contains(&"hostname".to_string()));
    }

    #[test]
    fn sudo_is_reported_as_a_command() {
        assert_eq!(commands("sudo rm -rf /")[0], "sudo");
    }

    #[test]
    fn quoted_separators_do_not_split() {
        assert_eq!(commands("echo 'a | b; c'"), vec!["echo"]);
    }

    #[test]
    fn unclosed_quote_is_a_parse_error() {
        assert_eq!(
            extract_commands("echo 'oops"),
            Err(ParseError::UnclosedQuote)
        );
    }

    #[test]
    fn unclosed_substitution_is_a_parse_error() {
        assert_eq!(
            extract_commands("echo $(date"),
            Err(ParseError::UnclosedSubstitution)
        );
    }

    #[test]
    fn allowed_command_after_assignment_is_first() {
        // property from the dispatch gate: the command after `VAR=1 ` must be
        // the first extracted element
        for c in ["ls", "grep", "cargo", "git"] {
            let got = commands(&format!("VAR=1 {c}"));
            assert_eq!(got.first().map(String::as_str), Some(c));
        }
    }

    // ── extract_file_paths ────────────────────────────────────────────────────

    #[test]
    fn mutating_commands_expose_operands() {
        let got = extract_file_paths("cp a.txt b.txt");
        assert_eq!(got, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn flags_are_not_paths() {
        let got = extract_file_paths("rm -rf build");
        assert_eq!(got, vec!["build"]);
    }

    #[test]
    fn chmod_mode_is_not_a_path() {
        let got = extract_file_paths("chmod 755 script.sh");
        assert_eq!(got, vec!["script.sh"]);
    }

    #[test]
    fn curl_output_flag_is_a_path() {
        let got = extract_file_paths("curl -o out.html https://example.com");
        assert_eq!(got, vec!["out.html"]);
    }

    #[test]
    fn wget_output_document_is_a_path() {
        let got = extract_file_paths("wget --output-document=page.html https://example.com");
        assert_eq!(got, vec!["page.html"]);
    }

    #[test]
    fn unzip_dest_dir_is_a_path() {
        let got = extract_file_paths("unzip archive.zip -d extracted");
        assert_eq!(got, vec!["extracted"]);
    }

    #[test]
    fn redirection_target_is_a_path() {
        assert_eq!(extract_file_paths("echo hi > out.txt"), vec!["out.txt"]);
        assert_eq!(extract_file_paths("echo hi >> log.txt"), vec!["log.txt"]);
    }

    #[test]
    fn stderr_and_combined_redirects_are_paths() {
        assert_eq!(extract_file_paths("cmd 2> err.log"), vec!["err.log"]);
        assert_eq!(extract_file_paths("cmd &> all.log"), vec!["all.log"]);
    }

    #[test]
    fn attached_redirect_form_is_a_path() {
        assert_eq!(extract_file_paths("echo hi >out.txt"), vec!["out.txt"]);
    }

    #[test]
    fn stream_merge_is_not_a_path() {
        assert!(extract_file_paths("cmd 2>&1").is_empty());
    }

    #[test]
    fn non_mutating_command_has_no_paths() {
        assert!(extract_file_paths("grep foo src/main.rs").is_empty());
    }

    #[test]
    fn tee_operand_is_a_path() {
        let got = extract_file_paths("make 2>&1 | tee build.log");
        assert_eq!(got, vec!["build.log"]);
    }

    #[test]
    fn redirection_inside_a_mutating_command_is_not_an_operand() {
        let got = extract_file_paths("rm old.txt > removal.log");
        assert_eq!(got, vec!["old.txt", "removal.log"]);
    }

    // ── validate_rm ───────────────────────────────────────────────────────────

    #[test]
    fn rm_with_no_target_is_rejected() {
        assert!(validate_rm("rm -rf").is_err());
    }

    #[test]
    fn rm_of_ordinary_file_is_allowed() {
        assert!(validate_rm("rm notes.txt").is_ok());
        assert!(validate_rm("rm -r build/").is_ok());
    }

    #[test]
    fn rm_dangerous_targets_are_rejected() {
        for target in ["/", "/*", "../*", ".*", "/etc", "/usr", "/home", "~", "*"] {
            assert!(
                validate_rm(&format!("rm -rf {target}")).is_err(),
                "rm -rf {target} must be rejected"
            );
        }
    }

    #[test]
    fn recursive_rm_with_wildcard_is_rejected() {
        assert!(validate_rm("rm -r src/*").is_err());
        assert!(validate_rm("rm -R *.rs").is_err());
    }

    #[test]
    fn non_recursive_wildcard_is_allowed() {
        assert!(validate_rm("rm *.tmp").is_ok());
    }

    #[test]
    fn recursive_hidden_glob_is_rejected() {
        assert!(validate_rm("rm -rf .cache*").is_err());
    }

    // ── validate_kill ─────────────────────────────────────────────────────────

    #[test]
    fn kill_with_no_pid_is_rejected() {
        assert!(validate_kill("kill").is_err());
        assert!(validate_kill("kill -9").is_err());
    }

    #[test]
    fn kill_pid_1_is_rejected() {
        let err = validate_kill("kill -9 1").unwrap_err();
        assert!(err.contains("PID 1"));
    }

    #[test]
    fn kill_negative_pid_is_rejected() {
        assert!(validate_kill("kill -- -123").is_err());
    }

    #[test]
    fn kill_low_pid_is_rejected() {
        assert!(validate_kill("kill 42").is_err());
    }

    #[test]
    fn kill_ordinary_pid_is_allowed() {
        assert!(validate_kill("kill 4242").is_ok());
        assert!(validate_kill("kill -9 4242").is_ok());
        assert!(validate_kill("kill -TERM 4242").is_ok());
        assert!(validate_kill("kill -s TERM 4242").is_ok());
    }

    #[test]
    fn kill_list_is_allowed() {
        assert!(validate_kill("kill -l").is_ok());
    }

    #[test]
    fn kill_non_numeric_target_is_rejected() {
        assert!(validate_kill("kill %1").is_err());
    }
}
