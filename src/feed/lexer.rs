//! Content-line lexing: unfolding, property/parameter syntax, TEXT escapes.

use crate::models::RawProperty;

/// One unfolded `NAME;PARAM=VALUE:value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
    /// Physical line where the logical line starts (1-based).
    pub line: usize,
}

impl ContentLine {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_raw_property(&self) -> RawProperty {
        RawProperty {
            name: self.name.clone(),
            params: self.params.clone(),
            value: self.value.clone(),
        }
    }
}

/// Join folded continuation lines (CRLF or LF followed by SP/HTAB).
///
/// Returns logical lines paired with the physical line they start on. Blank
/// lines are dropped.
pub fn unfold(input: &str) -> Vec<(usize, String)> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (index, raw_line) in input.split('\n').enumerate() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if let Some(continuation) = line.strip_prefix([' ', '\t']) {
            if let Some((_, previous)) = lines.last_mut() {
                previous.push_str(continuation);
                continue;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        lines.push((index + 1, line.to_string()));
    }

    lines
}

/// Parse `name *(";" param) ":" value`.
///
/// Parameter values may be quoted, in which case they can contain `;`, `:`
/// and `,`. The error string describes what is wrong with the line.
pub fn parse_content_line(line: &str, line_num: usize) -> Result<ContentLine, String> {
    let name_end = line
        .find([';', ':'])
        .ok_or_else(|| "missing ':' separator".to_string())?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("missing property name".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("invalid property name {:?}", name));
    }

    let mut params = Vec::new();
    let mut rest = &line[name_end..];
    while let Some(after) = rest.strip_prefix(';') {
        let eq = after
            .find('=')
            .ok_or_else(|| format!("parameter without '=' in {}", name))?;
        let param_name = after[..eq].trim().to_ascii_uppercase();
        let mut value = String::new();
        let mut remaining = &after[eq + 1..];

        loop {
            if let Some(quoted) = remaining.strip_prefix('"') {
                let close = quoted
                    .find('"')
                    .ok_or_else(|| format!("unterminated quoted parameter {}", param_name))?;
                value.push_str(&quoted[..close]);
                remaining = &quoted[close + 1..];
            } else {
                let end = remaining.find([',', ';', ':']).unwrap_or(remaining.len());
                value.push_str(&remaining[..end]);
                remaining = &remaining[end..];
            }
            match remaining.strip_prefix(',') {
                Some(next) => {
                    value.push(',');
                    remaining = next;
                }
                None => break,
            }
        }

        params.push((param_name, value));
        rest = remaining;
    }

    let value = rest
        .strip_prefix(':')
        .ok_or_else(|| "missing ':' separator".to_string())?;

    Ok(ContentLine {
        name: name.to_ascii_uppercase(),
        params,
        value: value.to_string(),
        line: line_num,
    })
}

/// Undo TEXT escaping (`\n`, `\N`, `\,`, `\;`, `\\`).
pub fn unescape_text(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(',') => result.push(','),
            Some(';') => result.push(';'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

/// Split a TEXT list on unescaped commas and unescape each entry.
pub fn split_text_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' {
            items.push(unescape_text(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    items.push(unescape_text(&current));

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
