//! SQL script splitting.
//!
//! Migration scripts execute statement by statement, so the splitter has to
//! respect every construct a semicolon can hide inside: single- and
//! double-quoted strings, line and block comments, and dollar-quoted bodies
//! (`$$ … $$` and `$tag$ … $tag$`). Statements that contain nothing but
//! comments are dropped.

/// Split a SQL script into executable statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut pos = 0;

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut block_comment_depth = 0usize;
    let mut dollar_tag: Option<String> = None;

    while pos < sql.len() {
        if in_line_comment {
            let ch = sql[pos..].chars().next().unwrap_or('\0');
            let ch_len = ch.len_utf8();
            current.push_str(&sql[pos..pos + ch_len]);
            pos += ch_len;
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if block_comment_depth > 0 {
            if sql[pos..].starts_with("/*") {
                current.push_str("/*");
                pos += 2;
                block_comment_depth += 1;
                continue;
            }
            if sql[pos..].starts_with("*/") {
                current.push_str("*/");
                pos += 2;
                block_comment_depth = block_comment_depth.saturating_sub(1);
                continue;
            }

            let ch = sql[pos..].chars().next().unwrap_or('\0');
            let ch_len = ch.len_utf8();
            current.push_str(&sql[pos..pos + ch_len]);
            pos += ch_len;
            continue;
        }

        // Dollar-quoted body state ($$...$$ or $tag$...$tag$)
        if let Some(tag) = dollar_tag.as_deref() {
            if sql[pos..].starts_with(tag) {
                current.push_str(tag);
                pos += tag.len();
                dollar_tag = None;
                continue;
            }

            let ch = sql[pos..].chars().next().unwrap_or('\0');
            let ch_len = ch.len_utf8();
            current.push_str(&sql[pos..pos + ch_len]);
            pos += ch_len;
            continue;
        }

        if in_single_quote {
            if sql[pos..].starts_with("''") {
                current.push_str("''");
                pos += 2;
                continue;
            }
            if sql[pos..].starts_with('\'') {
                current.push('\'');
                pos += 1;
                in_single_quote = false;
                continue;
            }

            let ch = sql[pos..].chars().next().unwrap_or('\0');
            let ch_len = ch.len_utf8();
            current.push_str(&sql[pos..pos + ch_len]);
            pos += ch_len;
            continue;
        }

        if in_double_quote {
            if sql[pos..].starts_with("\"\"") {
                current.push_str("\"\"");
                pos += 2;
                continue;
            }
            if sql[pos..].starts_with('"') {
                current.push('"');
                pos += 1;
                in_double_quote = false;
                continue;
            }

            let ch = sql[pos..].chars().next().unwrap_or('\0');
            let ch_len = ch.len_utf8();
            current.push_str(&sql[pos..pos + ch_len]);
            pos += ch_len;
            continue;
        }

        if sql[pos..].starts_with("--") {
            current.push_str("--");
            pos += 2;
            in_line_comment = true;
            continue;
        }
        if sql[pos..].starts_with("/*") {
            current.push_str("/*");
            pos += 2;
            block_comment_depth = 1;
            continue;
        }

        if sql[pos..].starts_with('\'') {
            current.push('\'');
            pos += 1;
            in_single_quote = true;
            continue;
        }
        if sql[pos..].starts_with('"') {
            current.push('"');
            pos += 1;
            in_double_quote = true;
            continue;
        }

        if sql[pos..].starts_with('$') {
            if let Some(tag) = parse_dollar_tag_start(sql, pos) {
                current.push_str(tag);
                pos += tag.len();
                dollar_tag = Some(tag.to_string());
                continue;
            }
        }

        // Statement boundary
        if sql[pos..].starts_with(';') {
            push_statement(&mut statements, &mut current);
            pos += 1;
            continue;
        }

        let ch = sql[pos..].chars().next().unwrap_or('\0');
        let ch_len = ch.len_utf8();
        current.push_str(&sql[pos..pos + ch_len]);
        pos += ch_len;
    }

    // The last statement may not end with a semicolon.
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim().to_string();
    current.clear();
    if !stmt.is_empty() && !is_comment_only(&stmt) {
        statements.push(stmt);
    }
}

/// A starting dollar-quote delimiter at `pos`, e.g. `$$` or `$func$`.
fn parse_dollar_tag_start(sql: &str, pos: usize) -> Option<&str> {
    if !sql[pos..].starts_with('$') {
        return None;
    }

    let mut i = pos + 1;
    while i < sql.len() {
        let ch = sql[i..].chars().next()?;
        if ch == '$' {
            return Some(&sql[pos..i + 1]);
        }
        if ch.is_ascii_alphanumeric() || ch == '_' {
            i += ch.len_utf8();
            continue;
        }
        return None;
    }

    None
}

/// True when a statement holds only `--` comments and whitespace.
pub fn is_comment_only(stmt: &str) -> bool {
    let mut in_block = false;
    for line in stmt.lines() {
        let mut trimmed = line.trim();
        if in_block {
            match trimmed.find("*/") {
                Some(end) => {
                    in_block = false;
                    trimmed = trimmed[end + 2..].trim();
                }
                None => continue,
            }
        }
        while trimmed.starts_with("/*") {
            match trimmed.find("*/") {
                Some(end) => trimmed = trimmed[end + 2..].trim(),
                None => {
                    in_block = true;
                    trimmed = "";
                    break;
                }
            }
        }
        if !trimmed.is_empty() && !trimmed.starts_with("--") {
            return false;
        }
    }
    true
}

/// True when a top-level statement is a `CREATE DATABASE`, which cannot run
/// inside the migration transaction.
pub fn is_create_database(stmt: &str) -> bool {
    let upper = stmt.trim_start().to_ascii_uppercase();
    upper.starts_with("CREATE DATABASE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons_outside_strings_and_comments() {
        let sql = "\
            CREATE TABLE users(id BIGINT, note TEXT DEFAULT 'a;b');\n\
            -- comment with ; should not split\n\
            CREATE INDEX users_id_idx ON users(id);\n\
            /* block ; comment */\n\
            CREATE TABLE posts(id BIGINT);\
        ";

        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3, "unexpected split: {stmts:?}");
        assert_eq!(
            stmts[0],
            "CREATE TABLE users(id BIGINT, note TEXT DEFAULT 'a;b')"
        );
    }

    #[test]
    fn dollar_quoted_body_stays_one_statement() {
        let stmts = split_statements("DO $$ BEGIN SELECT 1; END $$;");
        assert_eq!(stmts.len(), 1, "unexpected split: {stmts:?}");
        assert_eq!(stmts[0], "DO $$ BEGIN SELECT 1; END $$");
    }

    #[test]
    fn tagged_dollar_quotes_are_preserved() {
        let sql = "\
            CREATE FUNCTION f() RETURNS void AS $body$\n\
            BEGIN\n\
              RAISE NOTICE 'x;y';\n\
            END;\n\
            $body$ LANGUAGE plpgsql;\n\
            CREATE TABLE t(id BIGINT);\
        ";

        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2, "unexpected split: {stmts:?}");
        assert!(stmts[0].contains("$body$"));
        assert_eq!(stmts[1], "CREATE TABLE t(id BIGINT)");
    }

    #[test]
    fn comment_only_statements_are_dropped() {
        let stmts = split_statements("-- nothing here\n;\nCREATE TABLE t(id BIGINT);\n-- tail");
        assert_eq!(stmts, vec!["CREATE TABLE t(id BIGINT)"]);
    }

    #[test]
    fn comment_only_detection() {
        assert!(is_comment_only("-- a\n-- b"));
        assert!(is_comment_only("/* block */"));
        assert!(!is_comment_only("-- a\nSELECT 1"));
    }

    #[test]
    fn create_database_detection_is_case_insensitive() {
        assert!(is_create_database("create database foo"));
        assert!(is_create_database("  CREATE DATABASE foo"));
        assert!(!is_create_database("CREATE TABLE foo(id int)"));
    }
}
