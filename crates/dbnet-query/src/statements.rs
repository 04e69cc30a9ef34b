//! Statement splitting

/// Split SQL text on `;` into statements.
///
/// Separators inside quoted strings, quoted identifiers and comments do not
/// split. Comments stay attached to the statement that follows them, and a
/// piece holding nothing but comments and whitespace is dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut chars = sql.chars().peekable();

    let mut flush = |current: &mut String, has_code: &mut bool| {
        let trimmed = current.trim();
        if *has_code && !trimmed.is_empty() {
            statements.push(trimmed.to_string());
        }
        current.clear();
        *has_code = false;
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                has_code = true;
                current.push(c);
                // Doubled quotes escape themselves
                while let Some(q) = chars.next() {
                    current.push(q);
                    if q == c {
                        match chars.next_if_eq(&c) {
                            Some(escaped) => current.push(escaped),
                            None => break,
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                current.push(c);
                for n in chars.by_ref() {
                    current.push(n);
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push(c);
                if let Some(star) = chars.next() {
                    current.push(star);
                }
                let mut prev = '\0';
                for n in chars.by_ref() {
                    current.push(n);
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            ';' => flush(&mut current, &mut has_code),
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                current.push(c);
            }
        }
    }
    flush(&mut current, &mut has_code);

    statements
}
