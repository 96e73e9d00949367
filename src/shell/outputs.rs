//! Output renderers. Each one drains exactly one server reply and
//! hands back whatever `Meta` the response header carried.

use std::io::{Read, Write};

use comfy_table::{presets, Table};

use msql::{Connection, Meta, QueryRows, Reply, Result};

/// Streams the reply's frames to `out` verbatim.
pub fn raw(conn: &mut Connection, out: &mut impl Write) -> Result<Option<Meta>> {
    let (data, fin) = conn.read_frame()?;
    let meta = first_line_meta(data);
    out.write_all(data)?;
    let mut fin = fin;
    while !fin {
        let (data, next_fin) = conn.read_frame()?;
        out.write_all(data)?;
        fin = next_fin;
    }
    Ok(meta)
}

/// Drains the reply without rendering anything.
pub fn trash(conn: &mut Connection) -> Result<Option<Meta>> {
    let (data, fin) = conn.read_frame()?;
    let meta = first_line_meta(data);
    let mut fin = fin;
    while !fin {
        fin = conn.read_frame()?.1;
    }
    Ok(meta)
}

/// Renders tabular replies as aligned text tables.
///
/// Rows stream in one frame at a time, but a table renderer wants all
/// its data up front to size the columns. The server already declares
/// each column's maximum width in the header, so every batch becomes
/// its own table: the header only on the first one, and the first row
/// of each page padded out to the declared widths so the pages line up.
pub fn sql(conn: &mut Connection, out: &mut impl Write) -> Result<Option<Meta>> {
    let reply = conn.read_reply()?;
    if let Some((text, meta)) = simple_summary(&reply) {
        out.write_all(text.as_bytes())?;
        return Ok(meta);
    }
    let Reply::Query(rows) = reply else {
        return Ok(None);
    };
    render_pages(rows, out)
}

fn render_pages<S: Read>(mut rows: QueryRows<'_, S>, out: &mut impl Write) -> Result<Option<Meta>> {
    let meta = rows.meta();

    // pad to whichever is wider, the declared width or the column name
    let mut widths = rows.lengths().to_vec();
    for (width, column) in widths.iter_mut().zip(rows.columns()) {
        *width = (*width).max(column.len());
    }

    let mut first_page = true;
    while let Some(mut batch) = rows.next_batch()? {
        if let Some(row) = batch.first_mut() {
            for (value, width) in row.iter_mut().zip(&widths) {
                while value.len() < *width {
                    value.push(' ');
                }
            }
        }

        let mut table = Table::new();
        table.load_preset(presets::ASCII_NO_BORDERS);
        if first_page {
            table.set_header(rows.columns());
            first_page = false;
        }
        for row in batch {
            table.add_row(row);
        }
        writeln!(out, "{table}")?;
    }

    Ok(meta)
}

/// Renders each row as a `-[ RECORD n ]` block of column/value lines.
pub fn expanded(conn: &mut Connection, out: &mut impl Write) -> Result<Option<Meta>> {
    let reply = conn.read_reply()?;
    if let Some((text, meta)) = simple_summary(&reply) {
        out.write_all(text.as_bytes())?;
        return Ok(meta);
    }
    let Reply::Query(mut rows) = reply else {
        return Ok(None);
    };

    let meta = rows.meta();
    let width = rows.columns().iter().map(|c| c.len()).max().unwrap_or(0);
    let labels: Vec<String> = rows
        .columns()
        .iter()
        .map(|column| format!("\n{column:<width$} | "))
        .collect();

    let mut record = 1;
    while let Some(batch) = rows.next_batch()? {
        for row in batch {
            write!(out, "-[ RECORD {record} ] ")?;
            for (label, value) in labels.iter().zip(&row) {
                write!(out, "{label}{value}")?;
            }
            writeln!(out)?;
            record += 1;
        }
    }
    Ok(meta)
}

fn simple_summary<S>(reply: &Reply<'_, S>) -> Option<(String, Option<Meta>)> {
    match reply {
        Reply::Query(_) => None,
        Reply::Empty => Some((String::new(), None)),
        Reply::Ok { meta } => Some(("OK\n\n".to_string(), *meta)),
        Reply::Prepared { .. } => Some(("OK\n\n".to_string(), None)),
        Reply::Affected { rows: 1, meta } => Some(("1 row affected\n\n".to_string(), *meta)),
        Reply::Affected { rows, meta } => Some((format!("{rows} rows affected\n\n"), *meta)),
    }
}

fn first_line_meta(data: &[u8]) -> Option<Meta> {
    let text = std::str::from_utf8(data).ok()?;
    Meta::parse(text.lines().next()?)
}
