//! Script splitting.

/// Lexical rules for [`split_statements`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitOptions {
    /// `$$ ... $$` and `$tag$ ... $tag$` bodies are opaque (Postgres).
    pub dollar_quotes: bool,
    /// `` `ident` `` quoting (MySQL).
    pub backticks: bool,
    /// Backslash escapes inside string literals (MySQL).
    pub backslash_escapes: bool,
    /// `#` starts a line comment (MySQL).
    pub hash_comments: bool,
    /// A `DELIMITER <d>` line switches the statement terminator (MySQL client convention).
    pub delimiter_directive: bool,
}

impl SplitOptions {
    pub fn postgres() -> Self {
        Self {
            dollar_quotes: true,
            ..Self::default()
        }
    }

    pub fn mysql() -> Self {
        Self {
            backticks: true,
            backslash_escapes: true,
            hash_comments: true,
            delimiter_directive: true,
            ..Self::default()
        }
    }
}

/// Split SQL into individual statements on `;` (or the active `DELIMITER`).
///
/// Terminators inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies are ignored. Comments before a statement are not
/// sent, and fragments holding nothing but comments are dropped.
pub fn split_statements(sql: &str, options: &SplitOptions) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut delimiter = String::from(";");
    let mut start = 0;
    let mut has_code = false;
    let mut line_start = true;
    let mut i = 0;

    while i < bytes.len() {
        if options.delimiter_directive && line_start && is_delimiter_directive(&bytes[i..]) {
            let line_end = find(bytes, i, b"\n").unwrap_or(bytes.len());
            push_statement(&mut statements, &sql[start..i], has_code);

            let new_delimiter = sql[i + "DELIMITER".len()..line_end].trim();
            if !new_delimiter.is_empty() {
                delimiter = new_delimiter.to_string();
            }

            i = line_end;
            start = line_end;
            has_code = false;
            continue;
        }

        let c = bytes[i];
        match c {
            b'\n' => {
                line_start = true;
                i += 1;
                continue;
            }
            b' ' | b'\t' | b'\r' => {
                i += 1;
                continue;
            }
            _ => line_start = false,
        }

        if bytes[i..].starts_with(b"--") || (options.hash_comments && c == b'#') {
            i = find(bytes, i, b"\n").unwrap_or(bytes.len());
            continue;
        }
        if bytes[i..].starts_with(b"/*") {
            i = find(bytes, i + 2, b"*/").map(|end| end + 2).unwrap_or(bytes.len());
            continue;
        }
        if bytes[i..].starts_with(delimiter.as_bytes()) {
            push_statement(&mut statements, &sql[start..i], has_code);
            i += delimiter.len();
            start = i;
            has_code = false;
            continue;
        }

        if !has_code {
            start = i;
            has_code = true;
        }
        i = match c {
            b'\'' => skip_quoted(bytes, i, b'\'', options.backslash_escapes),
            b'"' => skip_quoted(bytes, i, b'"', false),
            b'`' if options.backticks => skip_quoted(bytes, i, b'`', false),
            b'$' if options.dollar_quotes => skip_dollar_quoted(bytes, i),
            _ => i + 1,
        };
    }

    // The last statement might not end with a terminator
    push_statement(&mut statements, &sql[start..], has_code);
    statements
}

/// Split a T-SQL script on `GO` lines.
///
/// `GO` must stand alone on its line (case-insensitive), optionally followed
/// by a repeat count: `GO 3` sends the preceding batch three times.
pub fn split_go_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        match parse_go(line) {
            Some(count) => {
                let batch = current.trim();
                if !batch.is_empty() {
                    for _ in 0..count {
                        batches.push(batch.to_string());
                    }
                }
                current.clear();
            }
            None => {
                current.push_str(line);
                current.push('\n');
            }
        }
    }

    let batch = current.trim();
    if !batch.is_empty() {
        batches.push(batch.to_string());
    }

    batches
}

fn parse_go(line: &str) -> Option<usize> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.eq_ignore_ascii_case("GO") {
        return None;
    }
    let count = match parts.next() {
        Some(count) => count.parse().ok()?,
        None => 1,
    };
    match parts.next() {
        Some(_) => None,
        None => Some(count),
    }
}

fn push_statement(statements: &mut Vec<String>, text: &str, has_code: bool) {
    let text = text.trim();
    if has_code && !text.is_empty() {
        statements.push(text.to_string());
    }
}

fn is_delimiter_directive(rest: &[u8]) -> bool {
    const KEYWORD: &[u8] = b"DELIMITER";
    rest.len() > KEYWORD.len()
        && rest[..KEYWORD.len()].eq_ignore_ascii_case(KEYWORD)
        && matches!(rest[KEYWORD.len()], b' ' | b'\t')
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

/// Returns the index just past the closing quote (or the end of input).
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut j = open + 1;
    while j < bytes.len() {
        if backslash_escapes && bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

/// Skips a `$tag$ ... $tag$` body. A `$` that does not open a tag (e.g. `$1`) is a single byte.
fn skip_dollar_quoted(bytes: &[u8], open: usize) -> usize {
    let mut j = open + 1;
    if j < bytes.len() && bytes[j].is_ascii_digit() {
        return open + 1;
    }
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if j >= bytes.len() || bytes[j] != b'$' {
        return open + 1;
    }

    let tag = &bytes[open..=j];
    match find(bytes, j + 1, tag) {
        Some(close) => close + tag.len(),
        None => bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(sql: &str) -> Vec<String> {
        split_statements(sql, &SplitOptions::postgres())
    }

    fn mysql(sql: &str) -> Vec<String> {
        split_statements(sql, &SplitOptions::mysql())
    }

    #[test]
    fn test_split_simple_statements() {
        let stmts = pg("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_last_statement_without_terminator() {
        let stmts = pg("CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1)");
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]);
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION test() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = pg(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
        assert!(stmts[1].contains("SELECT 3"));
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$;\nSELECT $1;";
        let stmts = pg(sql);
        assert_eq!(stmts, vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT $1"]);
    }

    #[test]
    fn test_split_ignores_semicolons_in_literals_and_comments() {
        let sql = r#"
-- header; not a statement
INSERT INTO notes (body) VALUES ('a;b''c;');
/* block; comment */
UPDATE "odd;name" SET x = 1;
"#;
        let stmts = pg(sql);
        assert_eq!(
            stmts,
            vec![
                "INSERT INTO notes (body) VALUES ('a;b''c;')",
                "UPDATE \"odd;name\" SET x = 1",
            ]
        );
    }

    #[test]
    fn test_comment_only_fragments_dropped() {
        let stmts = pg("SELECT 1;\n-- trailing comment\n/* and another */\n");
        assert_eq!(stmts, vec!["SELECT 1"]);
        assert!(pg("  \n -- nothing here\n").is_empty());
    }

    #[test]
    fn test_non_ascii_text_is_preserved() {
        let stmts = pg("INSERT INTO t VALUES ('héllo; wörld');SELECT 'ü'");
        assert_eq!(stmts, vec!["INSERT INTO t VALUES ('héllo; wörld')", "SELECT 'ü'"]);
    }

    #[test]
    fn test_mysql_delimiter_directive() {
        let sql = r#"
CREATE TABLE t (id INT);
DELIMITER //
CREATE PROCEDURE p()
BEGIN
    SELECT 1;
    SELECT 2;
END //
DELIMITER ;
INSERT INTO t VALUES (1);
"#;
        let stmts = mysql(sql);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "CREATE TABLE t (id INT)");
        assert!(stmts[1].starts_with("CREATE PROCEDURE p()"));
        assert!(stmts[1].ends_with("END"));
        assert_eq!(stmts[2], "INSERT INTO t VALUES (1)");
    }

    #[test]
    fn test_mysql_quoting_rules() {
        let sql = "INSERT INTO `a;b` VALUES ('it\\'s; fine'); # comment; here\nSELECT 2;";
        let stmts = mysql(sql);
        assert_eq!(stmts, vec!["INSERT INTO `a;b` VALUES ('it\\'s; fine')", "SELECT 2"]);
    }

    #[test]
    fn test_delimiter_word_mid_line_is_not_a_directive() {
        let stmts = mysql("SELECT 'DELIMITER x' AS delimiter;");
        assert_eq!(stmts, vec!["SELECT 'DELIMITER x' AS delimiter"]);
    }

    #[test]
    fn test_go_batches() {
        let sql = "CREATE TABLE a (id INT)\nGO\nINSERT INTO a VALUES (1);\nINSERT INTO a VALUES (2);\ngo\n\nGO\nSELECT 1";
        let batches = split_go_batches(sql);
        assert_eq!(
            batches,
            vec![
                "CREATE TABLE a (id INT)",
                "INSERT INTO a VALUES (1);\nINSERT INTO a VALUES (2);",
                "SELECT 1",
            ]
        );
    }

    #[test]
    fn test_go_with_repeat_count() {
        let batches = split_go_batches("INSERT INTO a DEFAULT VALUES\nGO 3\n");
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b == "INSERT INTO a DEFAULT VALUES"));
    }

    #[test]
    fn test_go_must_stand_alone() {
        let batches = split_go_batches("SELECT 1 AS go\nGOTO done\nGO now\n");
        assert_eq!(batches, vec!["SELECT 1 AS go\nGOTO done\nGO now"]);
    }
}
