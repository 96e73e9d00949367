//! Slash commands: lines the shell handles itself instead of sending
//! to the server. The registry is a const table, fixed at compile
//! time, so nothing can mutate it while a handler is running.

use tracing::error;

use msql::Param;

use crate::shell::context::{Format, ShellContext};

type Handler = fn(&mut ShellContext, &str);

const COMMANDS: &[(&str, Handler)] = &[
    ("\\?", help),
    ("\\d", describe),
    ("\\d+", describe),
    ("\\du", users),
    ("\\f", set_format),
    ("\\h", help),
    ("\\q", quit),
    ("\\timing", toggle_timing),
    ("\\x", toggle_expanded),
];

/// Dispatches a `\`-prefixed line to its handler.
pub fn dispatch(context: &mut ShellContext, line: &str) {
    if line.is_empty() {
        return;
    }
    let (command, args) = match line.split_once(' ') {
        Some((command, args)) => (command, args),
        None => (line, ""),
    };

    match COMMANDS.iter().find(|(name, _)| *name == command) {
        Some((_, handler)) => handler(context, args),
        None => error!("invalid command, type \\h for a list of commands"),
    }
}

fn quit(_context: &mut ShellContext, _args: &str) {
    std::process::exit(0);
}

fn help(context: &mut ShellContext, _args: &str) {
    context.write(
        "\n\
         \\q - Quits the shell\n\
         \\? - Outputs this help screen\n\
         \\h - Alias for \\?\n\
         \n\
         \\f FORMAT - sets the output format to one of: 'raw', 'expanded', 'sql' or 'trash'\n\
         \\x on|off - turns expanded format on or off (for compatibility with psql)\n\
         \\timing on|off - prints the client-side duration of each statement\n\
         \n\
         \\d  - lists tables\n\
         \\d [SCHEMA.]TABLE - describes the table\n\
         \\du - lists users\n\
         \n",
    );
}

fn set_format(context: &mut ShellContext, args: &str) {
    match Format::parse(args) {
        Some(Format::Raw) => {
            context.format = Format::Raw;
            context.write("Raw display is on\n");
        }
        Some(Format::Sql) => {
            context.format = Format::Sql;
            context.write("SQL display is on\n");
        }
        Some(Format::Expanded) => {
            context.format = Format::Expanded;
            context.write("Expanded display is on\n");
        }
        Some(Format::Trash) => {
            context.format = Format::Trash;
            context.write("Trash display is on\n");
        }
        None => error!("valid formats for \\f are: 'raw', 'sql', 'expanded' and 'trash'"),
    }
}

fn toggle_expanded(context: &mut ShellContext, args: &str) {
    match args.to_lowercase().as_str() {
        "on" => {
            context.format = Format::Expanded;
            context.write("Expanded display is on\n");
        }
        "off" => {
            context.format = Format::Sql;
            context.write("Expanded display is off\n");
        }
        _ => error!("valid options for \\x are: 'on' or 'off'"),
    }
}

fn toggle_timing(context: &mut ShellContext, args: &str) {
    match args.to_lowercase().as_str() {
        "on" => {
            context.timing = true;
            context.write("Timing is on\n");
        }
        "off" => {
            context.timing = false;
            context.write("Timing is off\n");
        }
        _ => error!("valid options for \\timing are: 'on' or 'off'"),
    }
}

fn users(context: &mut ShellContext, _args: &str) {
    context.run_sql("select * from sys.users;");
}

const LIST_TABLES: &str = "\
    select s.name as Schema, t.name as Name, lower(tt.table_type_name) as Type \
    from sys.tables t \
    join sys.schemas s on t.schema_id = s.id \
    join sys.table_types tt on t.type = tt.table_type_id \
    where not t.system;";

fn describe(context: &mut ShellContext, args: &str) {
    let args = args.trim();
    if args.is_empty() {
        context.run_sql(LIST_TABLES);
        return;
    }

    let mut table = args.strip_suffix(';').unwrap_or(args);
    let mut schema = context.schema().to_string();
    if let Some((qualifier, name)) = table.split_once('.') {
        schema = qualifier.to_string();
        table = name;
    }

    let meta = match context.conn.prepare_row(
        "select t.name, t.query, t.type, t.id \
         from sys.schemas s \
         join sys.tables t on s.id = t.schema_id \
         where s.name = ? and t.name = ?",
        &[Param::Text(&schema), Param::Text(table)],
    ) {
        Ok(Some(meta)) if meta.len() >= 4 => meta,
        Ok(_) => {
            context.write(&format!("unknown {args}\n"));
            return;
        }
        Err(err) => {
            error!(context = "describe: meta", schema = %schema, table = %table, "{err}");
            return;
        }
    };

    let table_id: i64 = match meta[3].parse() {
        Ok(id) => id,
        Err(_) => {
            error!(context = "describe: id", schema = %schema, table = %table, "{}", meta[3]);
            return;
        }
    };

    match meta[2].as_str() {
        "0" => describe_table(context, table_id, table),
        "1" => {
            // a view: its definition is stored verbatim
            context.write(&meta[1]);
            context.write("\n\n");
        }
        // TODO: merge tables and remote tables need their own shapes
        kind => error!("don't know how to describe type: {kind}"),
    }
}

fn describe_table(context: &mut ShellContext, table_id: i64, table: &str) {
    if !create_table(context, table_id, table) {
        return;
    }
    if !primary_key(context, table_id, table) {
        return;
    }
    // close the create table X (...
    context.write("\n);\n");
    if !foreign_keys(context, table_id, table) {
        return;
    }
    context.write("\n");
}

fn create_table(context: &mut ShellContext, table_id: i64, table: &str) -> bool {
    let columns = match context.conn.prepare_rows(
        "select c.name, c.type, c.type_digits, c.type_scale, c.\"null\", c.\"default\" \
         from sys._columns c \
         where c.table_id = ? \
         order by c.number",
        &[Param::Int(table_id)],
    ) {
        Ok(columns) => columns,
        Err(err) => {
            error!(context = "describe table: columns", table_id, table, "{err}");
            return false;
        }
    };

    context.write(&format!("create table {table}(\n"));
    for (i, column) in columns.iter().enumerate() {
        if column.len() < 6 {
            continue;
        }
        context.write(&format!("  {} {}", column[0], column[1]));
        if column[4] == "false" {
            context.write(" not null");
        } else {
            context.write(" null");
        }
        if column[5] != "NULL" {
            context.write(&format!(" default {}", column[5]));
        }
        if i < columns.len() - 1 {
            context.write(",\n");
        }
    }
    true
}

fn primary_key(context: &mut ShellContext, table_id: i64, table: &str) -> bool {
    let keys = match context.conn.prepare_rows(
        "select col.name, key.name \
         from sys.objects col \
         join sys.keys key using (id) \
         where key.type = 0 and key.table_id = ?",
        &[Param::Int(table_id)],
    ) {
        Ok(keys) => keys,
        Err(err) => {
            error!(context = "describe table: pk", table_id, table, "{err}");
            return false;
        }
    };

    if keys.is_empty() {
        return true;
    }

    let name = &keys[0][1];
    let columns: Vec<&str> = keys.iter().map(|row| row[0].as_str()).collect();
    context.write(&format!(
        ",\n  primary key ({}) -- {}",
        columns.join(", "),
        name
    ));
    true
}

fn foreign_keys(context: &mut ShellContext, table_id: i64, table: &str) -> bool {
    let fks = match context.conn.prepare_rows(
        "select ref_t.name, ref_cols.name, table_cols.name, ref_keys.name, ref_keys.\"action\" \
         from sys._tables \"table\", \
            sys.objects table_cols, \
            sys.keys ref_keys, \
            sys._tables ref_t, \
            sys.objects ref_cols, \
            sys.keys table_keys, \
            sys.schemas ps \
         where \"table\".id = ref_keys.table_id \
          and ref_t.id = table_keys.table_id \
          and ref_keys.id = table_cols.id \
          and table_keys.id = ref_cols.id \
          and ref_keys.rkey = table_keys.id \
          and table_cols.nr = ref_cols.nr \
          and ref_t.schema_id = ps.id \
          and \"table\".id = ?",
        &[Param::Int(table_id)],
    ) {
        Ok(fks) => fks,
        Err(err) => {
            error!(context = "describe table: fk", table_id, table, "{err}");
            return false;
        }
    };

    if fks.is_empty() {
        return true;
    }

    context.write("\nForeign Keys:\n");
    for fk in fks {
        if fk.len() < 4 {
            continue;
        }
        context.write(&format!(
            "  {} foreign key ({}) references {}({});\n",
            fk[3], fk[2], fk[0], fk[1]
        ));
    }
    true
}
