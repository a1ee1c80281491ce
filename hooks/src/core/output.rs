//! Fixed-width fragments for the build log.
//!
//! Every function here is pure: a label or message goes in, a fragment of
//! log text comes out. Column math counts `char`s of the upper-cased label,
//! and a label too wide for its line simply overflows it.

/// Width of header, process and warning lines.
pub const LINE_WIDTH: usize = 70;
/// Width of subtask framing lines.
pub const SUBTASK_WIDTH: usize = 40;

/// Indentation for lines printed inside a process or subtask block.
const INDENT: &str = "   ";

const WARNING_BANNER: &str =
    "\n-----------------------------  WARNING  -----------------------------\n";

/// Renders structured log sections from plain strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }

    /// A 70 column header with the label centered between `:` fill.
    ///
    /// ```text
    /// ::::::::::::::::::::::::::: HEADLINE HERE ::::::::::::::::::::::::::::
    /// ```
    ///
    /// When the fill does not split evenly the extra colon goes right.
    pub fn header(&self, label: &str) -> String {
        let label = label.to_uppercase();
        let middle = width(&label) as i64 + 2;
        let remainder = LINE_WIDTH as i64 - middle;
        let left = remainder.div_euclid(2);
        let right = if remainder % 2 == 0 { left } else { left + 1 };

        let mut res = String::new();
        push_repeated(&mut res, ':', left);
        res.push(' ');
        res.push_str(&label);
        res.push(' ');
        push_repeated(&mut res, ':', right);
        res.push('\n');
        res
    }

    /// Opens a process block.
    ///
    /// ```text
    /// INSTALLING RUBY-2.2 ------------------------------------------------>
    /// ```
    ///
    /// The fragment ends with the indentation for the first output line.
    pub fn process_start(&self, label: &str) -> String {
        framed_start(label, LINE_WIDTH)
    }

    pub fn process_end(&self) -> String {
        "\n".to_string()
    }

    /// Same as [`TextFormatter::process_start`] on a 40 column budget.
    pub fn subtask_start(&self, label: &str) -> String {
        framed_start(label, SUBTASK_WIDTH)
    }

    /// Indents every line after the first; blank lines made of a doubled
    /// newline are collapsed first.
    pub fn subtask_info(&self, data: &str) -> String {
        data.replace("\n\n", "\n").replace('\n', "\n   ")
    }

    pub fn subtask_success(&self) -> String {
        "   [√] SUCCESS\n\n".to_string()
    }

    pub fn subtask_fail(&self) -> String {
        "   [!] FAILED\n\n".to_string()
    }

    pub fn bullet(&self, message: &str) -> String {
        format!("+> {message}\n")
    }

    pub fn bullet_info(&self, message: &str) -> String {
        format!("{INDENT}{message}")
    }

    pub fn bullet_sub(&self, message: &str) -> String {
        format!("{INDENT}- {message}")
    }

    pub fn warning(&self, message: &str) -> String {
        let mut res = WARNING_BANNER.to_string();
        res.push_str(&self.format_block(message));
        res
    }

    /// ```text
    /// ! DEPLOY STREAM DISCONNECTED !
    /// ```
    ///
    /// followed by the message as a block when one is given.
    pub fn fatal(&self, title: &str, message: Option<&str>) -> String {
        let mut res = format!("\n! {} !\n", title.to_uppercase());
        if let Some(message) = message {
            res.push_str(&self.format_block(message));
        }
        res
    }

    /// Breaks a message into lines at spaces.
    ///
    /// `j` holds the width of the last word placed, not of the whole line, so
    /// any word shorter than the limit starts a new line and prose comes out
    /// one word per line. Every word that starts a line is preceded by a
    /// newline, including the first one.
    pub fn format_block(&self, message: &str) -> String {
        let chars: Vec<char> = message.chars().collect();
        let last = chars.len().saturating_sub(1);
        let mut res = String::new();
        let mut word = String::new();
        let mut j = 0usize;

        for (i, &ch) in chars.iter().enumerate() {
            if ch == ' ' {
                if j <= LINE_WIDTH {
                    res.push('\n');
                    res.push_str(&word);
                    res.push(' ');
                    j = width(&word) + 1;
                } else {
                    res.push_str(&word);
                    res.push(' ');
                }
                word.clear();
            } else if i == last {
                word.push(ch);
                if j <= LINE_WIDTH {
                    res.push('\n');
                }
                res.push_str(&word);
            } else {
                word.push(ch);
            }
        }

        res.push('\n');
        res
    }
}

/// `LABEL ---...--->` padded to `max_len`, then a newline and the indent.
fn framed_start(label: &str, max_len: usize) -> String {
    let label = label.to_uppercase();
    let left = width(&label) as i64 + 1;
    let right = 1;
    let middle = max_len as i64 - (left + right);

    let mut res = String::from("\n");
    res.push_str(&label);
    res.push(' ');
    push_repeated(&mut res, '-', middle);
    res.push('>');
    res.push('\n');
    res.push_str(INDENT);
    res
}

fn width(text: &str) -> usize {
    text.chars().count()
}

/// Non-positive counts push nothing.
fn push_repeated(buf: &mut String, ch: char, count: i64) {
    for _ in 0..count.max(0) {
        buf.push(ch);
    }
}
