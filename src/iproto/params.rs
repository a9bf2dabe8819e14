//! Placeholder counting and parameter marshalling.

use rmp::encode;

use super::types::Param;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Sql,
    Escape,
    SingleQuote,
    DoubleQuote,
    /// Saw `/`, a block comment may follow.
    Slash,
    BlockComment,
    /// Saw `*` inside a block comment, `/` closes it.
    BlockStar,
    /// Saw `-`, a line comment may follow.
    Dash,
    LineComment,
}

/// Count `?` and `:` parameter markers outside quotes and comments.
///
/// The count is advisory: the server is the authority on parameters.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut state = Scan::Sql;

    for &b in sql.as_bytes() {
        // A tentative `/` or `-` that is not followed by its pair falls back
        // to SQL and the current byte is examined again there.
        match state {
            Scan::Slash if b == b'*' => {
                state = Scan::BlockComment;
                continue;
            }
            Scan::Dash if b == b'-' => {
                state = Scan::LineComment;
                continue;
            }
            Scan::Slash | Scan::Dash => state = Scan::Sql,
            _ => {}
        }

        state = match state {
            Scan::Sql => match b {
                b'?' | b':' => {
                    count += 1;
                    Scan::Sql
                }
                b'\\' => Scan::Escape,
                b'\'' => Scan::SingleQuote,
                b'"' => Scan::DoubleQuote,
                b'/' => Scan::Slash,
                b'-' => Scan::Dash,
                _ => Scan::Sql,
            },
            Scan::Escape => Scan::Sql,
            Scan::SingleQuote if b == b'\'' => Scan::Sql,
            Scan::DoubleQuote if b == b'"' => Scan::Sql,
            Scan::BlockComment if b == b'*' => Scan::BlockStar,
            Scan::BlockStar => match b {
                b'/' => Scan::Sql,
                b'*' => Scan::BlockStar,
                _ => Scan::BlockComment,
            },
            Scan::LineComment if b == b'\n' => Scan::Sql,
            other => other,
        };
    }

    count
}

/// Append the bind array for `params` to `buf`.
///
/// Parameters go out in index order; a named parameter is wrapped in a
/// one-entry map. On error `buf` is left as it was.
pub fn encode_params(params: &[Param], buf: &mut Vec<u8>) -> Result<()> {
    let start = buf.len();
    let result = write_params(params, buf);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

fn write_params(params: &[Param], buf: &mut Vec<u8>) -> Result<()> {
    encode::write_array_len(buf, params.len() as u32)?;
    for (index, param) in params.iter().enumerate() {
        if let Some(name) = &param.name {
            encode::write_map_len(buf, 1)?;
            encode::write_str(buf, name)?;
        }
        if param.is_null {
            encode::write_nil(buf)?;
        } else {
            param.value.encode(index, buf)?;
        }
    }
    Ok(())
}
