//! Binary event codec for udsync
//!
//! Wire format (all integers are big-endian):
//!
//! ```text
//! +------+--------+----------+--------+-------------+-------------+----------+
//! | kind | is_dir | name_len | name   | has_content | content_len | content  |
//! | 1    | 1      | 2        | n      | 1           | 4 (if set)  | variable |
//! +------+--------+----------+--------+-------------+-------------+----------+
//! ```
//!
//! Event kinds:
//! - 0x01: Created
//! - 0x02: Deleted
//!
//! The name is the path relative to the tracked root, UTF-8, `/`-separated.

use std::io::{Cursor, Read};

use bytes::{BufMut, Bytes, BytesMut};
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use serde::{Deserialize, Serialize};

/// What happened to the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Deleted,
}

mod wire {
    pub const CREATED: u8 = 0x01;
    pub const DELETED: u8 = 0x02;
}

/// A single filesystem change, as it crosses the wire.
///
/// `content` is `Some` exactly when the event is a non-directory creation
/// whose contents could be read; deletions never carry content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    /// Path relative to the tracked root
    pub name: String,
    pub kind: EventKind,
    pub is_directory: bool,
    /// File contents for a created regular file
    pub content: Option<Bytes>,
}

impl FileChangeEvent {
    /// Encode to the wire representation (unframed).
    ///
    /// # Errors
    /// Returns an error when the name or content does not fit its length
    /// field.
    pub fn encode(&self) -> Result<Bytes> {
        let name = self.name.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| eyre!("name too long to encode: {} bytes", name.len()))?;
        let content_len = self.content.as_ref().map_or(0, Bytes::len);
        let mut buf = BytesMut::with_capacity(2 + 2 + name.len() + 1 + 4 + content_len);

        buf.put_u8(match self.kind {
            EventKind::Created => wire::CREATED,
            EventKind::Deleted => wire::DELETED,
        });
        buf.put_u8(u8::from(self.is_directory));
        buf.put_u16(name_len);
        buf.put_slice(name);

        match &self.content {
            Some(content) => {
                let content_len = u32::try_from(content.len())
                    .map_err(|_| eyre!("content too large to encode: {} bytes", content.len()))?;
                buf.put_u8(1);
                buf.put_u32(content_len);
                buf.put_slice(content);
            }
            None => buf.put_u8(0),
        }

        Ok(buf.freeze())
    }

    /// Decode from the wire representation.
    ///
    /// # Errors
    /// Returns an error for truncated input, unknown kinds, non-UTF-8 names,
    /// or trailing garbage. The receiving side treats any error as a
    /// malformed datagram and discards it.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut head = [0u8; 2];
        cursor.read_exact(&mut head)?;
        let kind = match head[0] {
            wire::CREATED => EventKind::Created,
            wire::DELETED => EventKind::Deleted,
            other => bail!("unknown event kind: {other:#04x}"),
        };
        let is_directory = match head[1] {
            0 => false,
            1 => true,
            other => bail!("invalid is_directory flag: {other:#04x}"),
        };

        let mut name_len_buf = [0u8; 2];
        cursor.read_exact(&mut name_len_buf)?;
        let name_len = u16::from_be_bytes(name_len_buf) as usize;

        // Claimed lengths bound any allocation: a short datagram must not
        // cost a large zeroed buffer.
        let remaining = data.len().saturating_sub(cursor.position() as usize);
        if name_len > remaining {
            bail!("name length {name_len} exceeds {remaining} remaining bytes");
        }

        let mut name_buf = vec![0u8; name_len];
        cursor.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf).map_err(|e| eyre!("non-UTF-8 name: {e}"))?;

        let mut has_content = [0u8; 1];
        cursor.read_exact(&mut has_content)?;
        let content = match has_content[0] {
            0 => None,
            1 => {
                let mut len_buf = [0u8; 4];
                cursor.read_exact(&mut len_buf)?;
                let content_len = u32::from_be_bytes(len_buf) as usize;

                let remaining = data.len().saturating_sub(cursor.position() as usize);
                if content_len > remaining {
                    bail!("content length {content_len} exceeds {remaining} remaining bytes");
                }

                let mut content = vec![0u8; content_len];
                cursor.read_exact(&mut content)?;
                Some(Bytes::from(content))
            }
            other => bail!("invalid content flag: {other:#04x}"),
        };

        if cursor.position() != data.len() as u64 {
            bail!("trailing bytes after event");
        }

        Ok(Self {
            name,
            kind,
            is_directory,
            content,
        })
    }
}
