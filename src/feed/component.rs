//! BEGIN/END structure of a feed.

use crate::error::{SyncError, SyncResult};
use crate::utils::preview;

use super::lexer::{self, ContentLine};

const CONTEXT_PREVIEW_LEN: usize = 60;

/// A `BEGIN:X` ... `END:X` block with its properties and nested blocks.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    /// Line of the BEGIN.
    pub line: usize,
    pub properties: Vec<ContentLine>,
    pub children: Vec<Component>,
    /// Lines inside the block that are not valid content lines.
    pub errors: Vec<(usize, String)>,
    /// Unfolded source lines, BEGIN and END included.
    pub raw: Vec<String>,
}

impl Component {
    fn open(name: String, line: usize, begin: String) -> Self {
        Self {
            name,
            line,
            properties: Vec::new(),
            children: Vec::new(),
            errors: Vec::new(),
            raw: vec![begin],
        }
    }

    pub fn property(&self, name: &str) -> Option<&ContentLine> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ContentLine> + 'a {
        self.properties.iter().filter(move |p| p.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn raw_text(&self) -> String {
        self.raw.join("\n")
    }
}

/// Build the component tree for the single outer VCALENDAR.
///
/// Structural problems (unbalanced blocks, content outside the calendar,
/// broken lines at calendar level) are fatal. Broken lines inside a nested
/// block are recorded on that block and left for the caller to judge.
pub fn parse_calendar(text: &str) -> SyncResult<Component> {
    let mut stack: Vec<Component> = Vec::new();
    let mut calendar: Option<Component> = None;
    let mut last_line = 0;

    for (line_no, raw) in lexer::unfold(text) {
        last_line = line_no;
        let malformed = |reason: String| {
            SyncError::malformed(line_no, preview(&raw, CONTEXT_PREVIEW_LEN), reason)
        };

        if calendar.is_some() {
            return Err(malformed("content after END:VCALENDAR".to_string()));
        }

        let depth = stack.len();
        let content = match lexer::parse_content_line(&raw, line_no) {
            Ok(content) => content,
            Err(reason) => match stack.last_mut() {
                Some(top) if depth > 1 => {
                    top.errors.push((line_no, reason));
                    top.raw.push(raw);
                    continue;
                }
                _ => return Err(malformed(reason)),
            },
        };

        match content.name.as_str() {
            "BEGIN" => {
                let name = content.value.trim().to_ascii_uppercase();
                if name.is_empty() {
                    return Err(malformed("BEGIN without a component name".to_string()));
                }
                match (stack.is_empty(), name == "VCALENDAR") {
                    (true, false) => {
                        return Err(malformed(format!("expected BEGIN:VCALENDAR, found BEGIN:{}", name)))
                    }
                    (false, true) => return Err(malformed("nested VCALENDAR".to_string())),
                    _ => {}
                }
                stack.push(Component::open(name, line_no, raw));
            }
            "END" => {
                let name = content.value.trim().to_ascii_uppercase();
                let mut block = match stack.pop() {
                    Some(block) => block,
                    None => return Err(malformed(format!("END:{} without BEGIN", name))),
                };
                if block.name != name {
                    return Err(malformed(format!(
                        "END:{} does not close BEGIN:{} from line {}",
                        name, block.name, block.line
                    )));
                }
                block.raw.push(raw);

                match stack.last_mut() {
                    Some(parent) => {
                        // the calendar itself does not keep a copy of the feed
                        if parent.name != "VCALENDAR" {
                            parent.raw.extend(block.raw.iter().cloned());
                        }
                        parent.children.push(block);
                    }
                    None => calendar = Some(block),
                }
            }
            _ => match stack.last_mut() {
                Some(top) => {
                    top.raw.push(raw);
                    top.properties.push(content);
                }
                None => return Err(malformed("content outside VCALENDAR".to_string())),
            },
        }
    }

    if let Some(open) = stack.last() {
        return Err(SyncError::malformed(
            last_line,
            format!("BEGIN:{}", open.name),
            format!("BEGIN:{} at line {} is never closed", open.name, open.line),
        ));
    }

    calendar.ok_or_else(|| SyncError::malformed(last_line.max(1), "", "no VCALENDAR found"))
}
