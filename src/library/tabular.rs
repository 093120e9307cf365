//! Comma-separated table codec: one header row, one row per record.
//!
//! Fields containing a comma, quote or line break are wrapped in double
//! quotes with inner quotes doubled. Line endings may be `\n` or `\r\n`.

/// Parse failure with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct TabularError {
    pub line: usize,
    pub message: String,
}

/// Header plus data rows of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub header: Vec<String>,
    /// Data rows paired with the line each started on.
    pub rows: Vec<(usize, Vec<String>)>,
}

/// Render a header and rows as table text.
pub fn encode<I, R>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: AsRef<[String]>,
{
    let mut out = String::new();
    push_row(&mut out, header.iter().copied());
    for row in rows {
        push_row(&mut out, row.as_ref().iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (idx, field) in fields.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Parse table text. Blank lines are ignored; every row must match the header width.
pub fn decode(text: &str) -> Result<Table, TabularError> {
    let mut rows = split_rows(text)?.into_iter();
    let Some((_, header)) = rows.next() else {
        return Err(TabularError {
            line: 1,
            message: "missing header row".into(),
        });
    };
    let mut table = Table {
        header,
        rows: Vec::new(),
    };
    for (line, row) in rows {
        if row.len() != table.header.len() {
            return Err(TabularError {
                line,
                message: format!("expected {} fields, found {}", table.header.len(), row.len()),
            });
        }
        table.rows.push((line, row));
    }
    Ok(table)
}

fn split_rows(text: &str) -> Result<Vec<(usize, Vec<String>)>, TabularError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut line = 1usize;
    let mut row_line = 1usize;
    let mut in_quotes = false;
    let mut quoted_field = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() && !quoted_field => {
                in_quotes = true;
                quoted_field = true;
            }
            '"' => {
                return Err(TabularError {
                    line,
                    message: "unexpected quote inside unquoted field".into(),
                });
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                quoted_field = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_row(&mut rows, &mut row, &mut field, row_line, quoted_field);
                quoted_field = false;
                line += 1;
                row_line = line;
            }
            _ if quoted_field => {
                return Err(TabularError {
                    line,
                    message: "text after closing quote".into(),
                });
            }
            _ => field.push(ch),
        }
    }
    if in_quotes {
        return Err(TabularError {
            line: row_line,
            message: "unterminated quoted field".into(),
        });
    }
    finish_row(&mut rows, &mut row, &mut field, row_line, quoted_field);
    Ok(rows)
}

fn finish_row(
    rows: &mut Vec<(usize, Vec<String>)>,
    row: &mut Vec<String>,
    field: &mut String,
    line: usize,
    quoted_field: bool,
) {
    if row.is_empty() && field.is_empty() && !quoted_field {
        return;
    }
    row.push(std::mem::take(field));
    rows.push((line, std::mem::take(row)));
}
