//! Decoding of server replies and incremental row streaming.
//!
//! Replies are classified by the byte prefix of their first frame:
//! `!` is a server error, `&1` a tabular result, `&2` an update count,
//! `&3` a plain acknowledgement, `&5` a prepared-statement handle, and
//! an empty payload means the server had nothing to say.

use std::borrow::Cow;
use std::io::Read;

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::mapi_stream::MapiStream;

/// Timing statistics carried by `&1` and `&2` response headers.
///
/// All times are in microseconds. Fields the server omitted or that
/// fail to parse are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    pub row_count: i64,
    pub sql_time: i64,
    pub opt_time: i64,
    pub run_time: i64,
}

impl Meta {
    /// Extracts statistics from a response header line, if it carries
    /// the extended form.
    ///
    /// `&1` headers hold row count and run/opt/sql times at fields
    /// 2, 6, 7 and 8 of 9; `&2` headers at fields 1, 4, 5 and 6 of 7.
    pub fn parse(header: &str) -> Option<Meta> {
        let line = header.lines().next().unwrap_or(header);
        let fields: Vec<&str> = line.split(' ').collect();

        let [rows, run, opt, sql] = if line.starts_with("&1 ") && fields.len() == 9 {
            [2, 6, 7, 8]
        } else if line.starts_with("&2 ") && fields.len() == 7 {
            [1, 4, 5, 6]
        } else {
            return None;
        };

        let field = |i: usize| fields[i].parse::<i64>().unwrap_or(0);
        Some(Meta {
            row_count: field(rows),
            run_time: field(run),
            opt_time: field(opt),
            sql_time: field(sql),
        })
    }
}

/// A decoded server reply.
///
/// `Query` keeps a mutable borrow on the stream for its whole
/// lifetime: nothing else can touch the connection until the rows are
/// drained or the value is dropped.
pub enum Reply<'s, S> {
    /// No payload at all.
    Empty,
    /// The server acknowledged a statement that produces no rows.
    Ok { meta: Option<Meta> },
    /// A row-modifying statement, with the number of rows it touched.
    Affected { rows: i64, meta: Option<Meta> },
    /// A prepared-statement handle.
    Prepared { id: String },
    /// A tabular result; rows stream lazily out of [`QueryRows`].
    Query(QueryRows<'s, S>),
}

impl<S: Read> MapiStream<S> {
    /// Reads the next reply, classifying it by its first frame.
    pub fn read_reply(&mut self) -> Result<Reply<'_, S>> {
        let (payload, first_fin) = self.read_frame()?;
        let text = String::from_utf8_lossy(payload).into_owned();
        let mut fin = first_fin;

        if text.starts_with("&1 ") {
            return Ok(Reply::Query(QueryRows::new(self, &text, fin)?));
        }

        // Simple replies are expected to fit one frame, but stragglers
        // must not be left on the wire for the next reader.
        while !fin {
            fin = self.read_frame()?.1;
        }

        if let Some(rest) = text.strip_prefix('!') {
            let rest = rest.strip_suffix('\n').unwrap_or(rest);
            return Err(Error::Server(rest.to_string()));
        }

        if text.is_empty() {
            return Ok(Reply::Empty);
        }

        if text.starts_with("&2 ") {
            let meta = Meta::parse(&text);
            let line = text.lines().next().unwrap_or(text.as_str());
            return Ok(match line.split(' ').nth(1).and_then(|f| f.parse().ok()) {
                Some(rows) => Reply::Affected { rows, meta },
                None => Reply::Ok { meta },
            });
        }

        if text.starts_with("&3 ") {
            return Ok(Reply::Ok { meta: None });
        }

        if let Some(tail) = text.strip_prefix("&5 ") {
            let id = tail
                .split_whitespace()
                .next()
                .ok_or_else(|| Error::driver_detailed("invalid prepare response", &*text))?;
            return Ok(Reply::Prepared { id: id.to_string() });
        }

        Err(Error::driver_detailed("unknown response", text))
    }
}

/// A streaming tabular result.
///
/// The first frame of the response carries the header, the column
/// name/type/length lines and the opening row bytes; the remaining row
/// data is pulled frame by frame as [`next_batch`] is called.
///
/// [`next_batch`]: QueryRows::next_batch
pub struct QueryRows<'s, S> {
    stream: &'s mut MapiStream<S>,
    fin: bool,
    columns: Vec<String>,
    types: Vec<String>,
    lengths: Vec<usize>,
    meta: Option<Meta>,
    buf: BytesMut,
}

impl<'s, S: Read> QueryRows<'s, S> {
    fn new(stream: &'s mut MapiStream<S>, text: &str, fin: bool) -> Result<Self> {
        let mut parts = text.splitn(6, '\n');
        let header = parts.next().unwrap_or("");
        let meta = Meta::parse(header);

        let invalid = || Error::driver_detailed("invalid query result", text);
        let _table_names = parts.next().ok_or_else(invalid)?;
        let columns = header_fields(parts.next().ok_or_else(invalid)?)?;
        let types = header_fields(parts.next().ok_or_else(invalid)?)?;
        let lengths = header_fields(parts.next().ok_or_else(invalid)?)?
            .iter()
            .map(|l| l.parse().unwrap_or(0))
            .collect();
        let opening = parts.next().ok_or_else(invalid)?;

        Ok(QueryRows {
            stream,
            fin,
            columns,
            types,
            lengths,
            meta,
            buf: BytesMut::from(opening.as_bytes()),
        })
    }

    /// Column names, in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column SQL type names, same order and length as [`columns`].
    ///
    /// [`columns`]: QueryRows::columns
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Server-declared maximum display width per column.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn meta(&self) -> Option<Meta> {
        self.meta
    }

    /// Returns the next batch of decoded rows, or `None` once the
    /// result is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Vec<String>>>> {
        loop {
            if self.fin {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rows = self.decode_rows();
                return Ok(if rows.is_empty() { None } else { Some(rows) });
            }

            let (payload, fin) = self.stream.read_frame()?;
            self.fin = fin;
            self.buf.extend_from_slice(payload);

            let rows = self.decode_rows();
            if !rows.is_empty() {
                return Ok(Some(rows));
            }
            if self.fin && self.buf.is_empty() {
                return Ok(None);
            }
        }
    }

    /// Drains the remaining batches into one table.
    pub fn rows(mut self) -> Result<Vec<Vec<String>>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch()? {
            all.extend(batch);
        }
        Ok(all)
    }

    fn decode_rows(&mut self) -> Vec<Vec<String>> {
        // A frame boundary can land right after a row's newline.
        if self.buf.first() == Some(&b'\n') {
            let _ = self.buf.split_to(1);
        }

        let data = String::from_utf8_lossy(&self.buf).into_owned();
        let mut lines: Vec<&str> = data.split('\n').collect();

        // The last line is only a complete row if it closes with "\t]";
        // otherwise it stays buffered until the next frame extends it.
        let mut partial = "";
        if let Some(last) = lines.last() {
            if !last.ends_with("\t]") {
                partial = lines.pop().unwrap_or("");
            }
        }

        let mut table = Vec::with_capacity(lines.len());
        for line in lines {
            let body = line.strip_prefix("[\t").unwrap_or(line);
            let body = body.strip_suffix("\t]").unwrap_or(body);
            let row = body
                .split(",\t")
                .map(|value| match value.strip_prefix('"') {
                    Some(inner) => {
                        let inner = inner.strip_suffix('"').unwrap_or(inner);
                        unquote(inner).into_owned()
                    }
                    None => value.to_string(),
                })
                .collect();
            table.push(row);
        }

        let partial = partial.as_bytes().to_vec();
        self.buf.clear();
        self.buf.extend_from_slice(&partial);
        table
    }
}

/// Undoes MonetDB's backslash escaping of a quoted value.
///
/// Values without a backslash come back borrowed. Recognized escapes
/// are `\n`, `\r`, `\t`, `\f` and `\v`; anything else (including `\\`,
/// `\'` and `\"`) copies the following character verbatim.
pub fn unquote(value: &str) -> Cow<'_, str> {
    if !value.contains('\\') {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('f') => out.push('\x0C'),
            Some('v') => out.push('\x0B'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    Cow::Owned(out)
}

fn header_fields(line: &str) -> Result<Vec<String>> {
    let line = line
        .strip_prefix("% ")
        .ok_or_else(|| Error::driver_detailed("invalid query result header", line))?;
    let line = match line.rfind(" # ") {
        Some(cut) => &line[..cut],
        None => line,
    };
    Ok(line.split(",\t").map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::{unquote, Meta, Reply};
    use crate::error::Error;
    use crate::mapi_stream::MapiStream;

    fn frames(parts: &[(&str, bool)]) -> Vec<u8> {
        let mut wire = Vec::new();
        for (payload, fin) in parts {
            let header = ((payload.len() as u16) << 1) | (*fin as u16);
            wire.extend_from_slice(&header.to_le_bytes());
            wire.extend_from_slice(payload.as_bytes());
        }
        wire
    }

    fn reply_of(wire: &[u8]) -> MapiStream<&[u8]> {
        MapiStream::from_stream(wire)
    }

    #[test]
    fn test_meta_from_query_header() {
        let meta = Meta::parse("&1 0 2 2 2 0 245 106 3480").unwrap();
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.run_time, 245);
        assert_eq!(meta.opt_time, 106);
        assert_eq!(meta.sql_time, 3480);
    }

    #[test]
    fn test_meta_from_update_header() {
        let meta = Meta::parse("&2 1 -1 4 262 204 2090").unwrap();
        assert_eq!(meta.row_count, 1);
        assert_eq!(meta.run_time, 262);
        assert_eq!(meta.opt_time, 204);
        assert_eq!(meta.sql_time, 2090);
    }

    #[test]
    fn test_meta_unparsable_fields_are_zero() {
        let meta = Meta::parse("&1 0 x 2 2 0 nan 106 3480").unwrap();
        assert_eq!(meta.row_count, 0);
        assert_eq!(meta.run_time, 0);
        assert_eq!(meta.opt_time, 106);
    }

    #[test]
    fn test_meta_absent_on_short_headers() {
        assert!(Meta::parse("&2 17 4").is_none());
        assert!(Meta::parse("&3 ").is_none());
    }

    #[test]
    fn test_empty_reply() {
        let wire = frames(&[("", true)]);
        assert!(matches!(
            reply_of(&wire).read_reply().unwrap(),
            Reply::Empty
        ));
    }

    #[test]
    fn test_ok_reply() {
        let wire = frames(&[("&3 ", true)]);
        assert!(matches!(
            reply_of(&wire).read_reply().unwrap(),
            Reply::Ok { meta: None }
        ));
    }

    #[test]
    fn test_affected_reply_with_meta() {
        let wire = frames(&[("&2 1 -1 4 262 204 2090\n", true)]);
        match reply_of(&wire).read_reply().unwrap() {
            Reply::Affected { rows, meta } => {
                assert_eq!(rows, 1);
                assert_eq!(meta.unwrap().run_time, 262);
            }
            _ => panic!("expected affected"),
        }
    }

    #[test]
    fn test_update_without_count_decays_to_ok() {
        let wire = frames(&[("&2 pending", true)]);
        assert!(matches!(
            reply_of(&wire).read_reply().unwrap(),
            Reply::Ok { meta: None }
        ));
    }

    #[test]
    fn test_prepared_reply() {
        let wire = frames(&[("&5 3 1 1 1\n% prepare # name\n", true)]);
        match reply_of(&wire).read_reply().unwrap() {
            Reply::Prepared { id } => assert_eq!(id, "3"),
            _ => panic!("expected prepared"),
        }
    }

    #[test]
    fn test_server_error_reply() {
        let wire = frames(&[("!table t does not exist\n", true)]);
        match reply_of(&wire).read_reply() {
            Err(Error::Server(msg)) => assert_eq!(msg, "table t does not exist"),
            other => panic!("expected server error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_prefix_is_driver_error() {
        let wire = frames(&[("&9 whatever", true)]);
        match reply_of(&wire).read_reply() {
            Err(Error::Driver { message, details }) => {
                assert_eq!(message, "unknown response");
                assert_eq!(details.as_deref(), Some("&9 whatever"));
            }
            other => panic!("expected driver error, got {:?}", other.err()),
        }
    }

    const SELECT_HEADER: &str = "&1 0 2 2 2 0 245 106 3480\n\
                                 % sys.t,\tsys.t # table_name\n\
                                 % a,\tb # name\n\
                                 % int,\tclob # type\n\
                                 % 1,\t4 # length\n";

    #[test]
    fn test_query_header_parsing() {
        let payload = format!("{SELECT_HEADER}[\t1,\t\"x\"\t]\n");
        let wire = frames(&[(&payload, true)]);
        let mut stream = reply_of(&wire);
        match stream.read_reply().unwrap() {
            Reply::Query(q) => {
                assert_eq!(q.columns(), &["a", "b"]);
                assert_eq!(q.types(), &["int", "clob"]);
                assert_eq!(q.lengths(), &[1, 4]);
                assert_eq!(q.meta().unwrap().row_count, 2);
                assert_eq!(q.rows().unwrap(), vec![vec!["1", "x"]]);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_rows_across_mid_quote_frame_split() {
        // the split lands between the backslash and the 'n' of the
        // escaped newline inside the first quoted value
        let first = format!("{SELECT_HEADER}[\t1,\t\"a\\");
        let second = "nb\"\t]\n[\t2,\t\"c\"\t]\n";
        let wire = frames(&[(&first, false), (second, true)]);

        let mut stream = reply_of(&wire);
        match stream.read_reply().unwrap() {
            Reply::Query(mut q) => {
                let batch = q.next_batch().unwrap().unwrap();
                assert_eq!(batch, vec![vec!["1", "a\nb"], vec!["2", "c"]]);
                assert!(q.next_batch().unwrap().is_none());
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_rows_buffer_until_a_frame_is_read() {
        // decoding happens after each read, so the opening row and the
        // second frame's row surface together
        let first = format!("{SELECT_HEADER}[\t1,\t\"x\"\t]\n");
        let wire = frames(&[(&first, false), ("[\t2,\t\"y\"\t]\n", true)]);

        let mut stream = reply_of(&wire);
        match stream.read_reply().unwrap() {
            Reply::Query(mut q) => {
                let batch = q.next_batch().unwrap().unwrap();
                assert_eq!(batch, vec![vec!["1", "x"], vec!["2", "y"]]);
                assert!(q.next_batch().unwrap().is_none());
            }
            _ => panic!("expected query"),
        }
    }

    fn server_quote(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\x0C' => out.push_str("\\f"),
                '\x0B' => out.push_str("\\v"),
                c => out.push(c),
            }
        }
        out
    }

    #[test]
    fn test_unquote_inverts_server_quoting() {
        for v in [
            "plain",
            "tab\there",
            "line\nbreak",
            "back\\slash",
            "quo\"te",
            "mixed \\ \" \n\r\t\x0C\x0B end",
            "",
        ] {
            assert_eq!(unquote(&server_quote(v)), v, "value {v:?}");
        }
    }

    #[test]
    fn test_unquote_fast_path_borrows() {
        assert!(matches!(
            unquote("nothing to do"),
            std::borrow::Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_unquote_unknown_escape_copies_verbatim() {
        assert_eq!(unquote("a\\qb"), "aqb");
    }
}
