//! Кодек RESP2 (REdis Serialization Protocol).
//!
//! Клиенту нужны две вещи: кодировать команды как массив bulk-строк и
//! инкрементально разбирать ответы сервера, которые приходят частями.
//! Декодер не хранит состояния между вызовами: если кадр неполный, он
//! возвращает `None` и ничего не потребляет из буфера.

use std::{borrow::Cow, io::Cursor};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zprobe_error::ConnectionError;

/// Maximum line length for simple strings, errors and headers (64kb).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
/// Maximum BulkString size (512mb).
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Maximum nesting of arrays (32 levels).
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Кадр RESP2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None`: null bulk string (`$-1`).
    Bulk(Option<Bytes>),
    /// `None`: null array (`*-1`).
    Array(Option<Vec<RespFrame>>),
}

impl RespFrame {
    /// Байтовое содержимое строкового кадра.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Simple(s) => Some(s.as_bytes()),
            Self::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        self.as_bytes().map(String::from_utf8_lossy)
    }

    /// Краткое описание для сообщений об ошибках.
    pub fn describe(&self) -> String {
        match self {
            Self::Simple(s) => format!("+{s}"),
            Self::Error(e) => format!("-{e}"),
            Self::Integer(i) => format!(":{i}"),
            Self::Bulk(Some(b)) => format!("${}", String::from_utf8_lossy(b)),
            Self::Bulk(None) => "$nil".to_string(),
            Self::Array(Some(items)) => format!("*[{} items]", items.len()),
            Self::Array(None) => "*nil".to_string(),
        }
    }
}

/// Кодирует команду как массив bulk-строк.
pub fn encode_command<I, A>(args: I) -> BytesMut
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    let args: Vec<A> = args.into_iter().collect();
    let mut buf = BytesMut::with_capacity(16 + args.iter().map(|a| a.as_ref().len() + 16).sum::<usize>());

    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in &args {
        let arg = arg.as_ref();
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
    buf
}

/// Пытается извлечь из буфера один полный кадр.
///
/// При успехе потреблённые байты удаляются из `buf`.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespFrame>, ConnectionError> {
    let mut cursor = Cursor::new(&buf[..]);
    match parse(&mut cursor, 0)? {
        Some(frame) => {
            let consumed = cursor.position() as usize;
            buf.advance(consumed);
            Ok(Some(frame))
        }
        None => Ok(None),
    }
}

fn parse(
    cur: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<RespFrame>, ConnectionError> {
    if !cur.has_remaining() {
        return Ok(None);
    }
    match cur.get_u8() {
        b'+' => Ok(read_line(cur)?.map(|l| RespFrame::Simple(String::from_utf8_lossy(l).into_owned()))),
        b'-' => Ok(read_line(cur)?.map(|l| RespFrame::Error(String::from_utf8_lossy(l).into_owned()))),
        b':' => match read_line(cur)? {
            Some(line) => Ok(Some(RespFrame::Integer(parse_int(line)?))),
            None => Ok(None),
        },
        b'$' => parse_bulk(cur),
        b'*' => parse_array(cur, depth),
        other => Err(protocol(format!(
            "Unknown RESP type byte 0x{other:02x} at {}",
            cur.position() - 1
        ))),
    }
}

fn parse_bulk(cur: &mut Cursor<&[u8]>) -> Result<Option<RespFrame>, ConnectionError> {
    let Some(line) = read_line(cur)? else {
        return Ok(None);
    };
    let len = parse_int(line)?;
    if len == -1 {
        return Ok(Some(RespFrame::Bulk(None)));
    }
    if len < 0 {
        return Err(protocol(format!("Negative bulk length {len}")));
    }
    let len = len as usize;
    if len > MAX_BULK_LENGTH {
        return Err(protocol(format!(
            "Bulk string too long ({len} > {MAX_BULK_LENGTH})"
        )));
    }
    if cur.remaining() < len + 2 {
        return Ok(None);
    }

    let start = cur.position() as usize;
    let data = &cur.get_ref()[start..start + len];
    if &cur.get_ref()[start + len..start + len + 2] != b"\r\n" {
        return Err(protocol("Bulk string is not terminated by CRLF".to_string()));
    }
    let payload = Bytes::copy_from_slice(data);
    cur.advance(len + 2);
    Ok(Some(RespFrame::Bulk(Some(payload))))
}

fn parse_array(
    cur: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<RespFrame>, ConnectionError> {
    if depth >= MAX_ARRAY_DEPTH {
        return Err(protocol(format!(
            "Max array depth exceeded ({MAX_ARRAY_DEPTH})"
        )));
    }
    let Some(line) = read_line(cur)? else {
        return Ok(None);
    };
    let len = parse_int(line)?;
    if len == -1 {
        return Ok(Some(RespFrame::Array(None)));
    }
    if len < 0 {
        return Err(protocol(format!("Negative array length {len}")));
    }

    let mut items = Vec::with_capacity((len as usize).min(1024));
    for _ in 0..len {
        match parse(cur, depth + 1)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(RespFrame::Array(Some(items))))
}

/// Читает строку до CRLF. `None`, если CRLF ещё не пришёл.
fn read_line<'a>(cur: &mut Cursor<&'a [u8]>) -> Result<Option<&'a [u8]>, ConnectionError> {
    let data: &'a [u8] = *cur.get_ref();
    let start = cur.position() as usize;

    match data[start..].windows(2).position(|w| w == b"\r\n") {
        Some(offset) => {
            if offset > MAX_LINE_LENGTH {
                return Err(protocol(format!("Line too long ({offset} > {MAX_LINE_LENGTH})")));
            }
            cur.set_position((start + offset + 2) as u64);
            Ok(Some(&data[start..start + offset]))
        }
        None if data.len() - start > MAX_LINE_LENGTH => Err(protocol(format!(
            "Line too long (> {MAX_LINE_LENGTH}) without CRLF"
        ))),
        None => Ok(None),
    }
}

fn parse_int(line: &[u8]) -> Result<i64, ConnectionError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol(format!("Invalid integer '{}'", String::from_utf8_lossy(line))))
}

fn protocol(reason: String) -> ConnectionError {
    ConnectionError::Protocol { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<RespFrame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "unconsumed bytes left: {buf:?}");
        frames
    }

    #[test]
    fn test_encode_command() {
        let buf = encode_command(["PUBLISH", "chan", "hello"]);
        assert_eq!(
            &buf[..],
            b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nchan\r\n$5\r\nhello\r\n"
        );
    }

    #[test]
    fn test_decode_scalars() {
        let frames = decode_all(b"+OK\r\n-ERR wrong\r\n:42\r\n$5\r\nhello\r\n$-1\r\n");
        assert_eq!(
            frames,
            vec![
                RespFrame::Simple("OK".into()),
                RespFrame::Error("ERR wrong".into()),
                RespFrame::Integer(42),
                RespFrame::Bulk(Some(Bytes::from_static(b"hello"))),
                RespFrame::Bulk(None),
            ]
        );
    }

    /// pmessage от сервера: массив из четырёх bulk-строк.
    #[test]
    fn test_decode_pmessage() {
        let raw = b"*4\r\n$8\r\npmessage\r\n$7\r\ntopic/*\r\n$7\r\ntopic/x\r\n$1\r\nm\r\n";
        let frames = decode_all(raw);
        let RespFrame::Array(Some(items)) = &frames[0] else {
            panic!("expected array, got {:?}", frames[0]);
        };
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].as_text().unwrap(), "pmessage");
        assert_eq!(items[2].as_text().unwrap(), "topic/x");
    }

    /// Неполный кадр не потребляет байты, а после дочитывания разбирается.
    #[test]
    fn test_decode_partial_frame() {
        let raw: &[u8] = b"*3\r\n$9\r\nsubscribe\r\n$4\r\nchan\r\n:1\r\n";
        for split in 1..raw.len() {
            let mut buf = BytesMut::from(&raw[..split]);
            assert_eq!(decode(&mut buf).unwrap(), None, "split at {split}");
            assert_eq!(buf.len(), split);

            buf.extend_from_slice(&raw[split..]);
            let frame = decode(&mut buf).unwrap().unwrap();
            assert!(matches!(frame, RespFrame::Array(Some(ref items)) if items.len() == 3));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_decode_binary_bulk_with_crlf_inside() {
        let frames = decode_all(b"$4\r\na\r\nb\r\n");
        assert_eq!(frames, vec![RespFrame::Bulk(Some(Bytes::from_static(b"a\r\nb")))]);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut buf = BytesMut::from(&b"?oops\r\n"[..]);
        assert!(matches!(
            decode(&mut buf),
            Err(ConnectionError::Protocol { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_integer() {
        let mut buf = BytesMut::from(&b":12x\r\n"[..]);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_rejects_unterminated_bulk() {
        let mut buf = BytesMut::from(&b"$2\r\nabXY"[..]);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_depth_limit() {
        let mut raw = Vec::new();
        for _ in 0..=MAX_ARRAY_DEPTH {
            raw.extend_from_slice(b"*1\r\n");
        }
        raw.extend_from_slice(b":1\r\n");
        let mut buf = BytesMut::from(&raw[..]);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_line_limit() {
        let raw = vec![b'a'; MAX_LINE_LENGTH + 2];
        let mut buf = BytesMut::from(&b"+"[..]);
        buf.extend_from_slice(&raw);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn test_frame_helpers() {
        assert_eq!(RespFrame::Integer(3).as_bytes(), None);
        assert_eq!(RespFrame::Simple("PONG".into()).as_text().unwrap(), "PONG");
        assert_eq!(RespFrame::Bulk(None).describe(), "$nil");
    }
}
