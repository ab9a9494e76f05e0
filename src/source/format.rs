use crate::source::record::NativeRecord;
use thiserror::Error;

/// Stored in place of a message that could not be rendered.
pub const MESSAGE_UNAVAILABLE: &str = "message unavailable";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("no message template for event {event_id} from '{source_name}'")]
    NoTemplate { source_name: String, event_id: u32 },

    #[error("template references insertion string %{index} but only {available} present")]
    MissingInsert { index: usize, available: usize },
}

/// Renders a record's message by substituting its insertion strings into the
/// template. `%%` is a literal percent sign; `%` not followed by a digit is
/// copied through.
pub fn format_message(record: &NativeRecord) -> Result<String, FormatError> {
    let template = record
        .message_template
        .as_deref()
        .ok_or_else(|| FormatError::NoTemplate {
            source_name: record.source_name.clone(),
            event_id: record.event_id,
        })?;

    let inserts = &record.insertion_strings;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(d) if d.is_ascii_digit() => {
                let mut index = 0usize;
                while let Some(d) = chars.peek().and_then(|d| d.to_digit(10)) {
                    index = index.saturating_mul(10).saturating_add(d as usize);
                    chars.next();
                }
                let insert = index
                    .checked_sub(1)
                    .and_then(|i| inserts.get(i))
                    .ok_or(FormatError::MissingInsert {
                        index,
                        available: inserts.len(),
                    })?;
                out.push_str(insert);
            }
            _ => out.push('%'),
        }
    }

    Ok(out.trim_end().to_string())
}
