//! The msql interactive shell.
//!
//! Reads lines, dispatches `\` commands locally, assembles everything
//! else into SQL statements and streams the server's replies through
//! the selected output format.

mod shell;

use std::io::{IsTerminal, Read};
use std::process;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use msql::{Config, Connection, LineStep, StatementAssembler};

use crate::shell::commands;
use crate::shell::context::{Format, ShellContext};
use crate::shell::password;
use crate::shell::preferences;

struct Options {
    host: String,
    port: u16,
    user: String,
    database: String,
    schema: Option<String>,
    role: Option<String>,
    command: Option<String>,
    file: Option<String>,
    format: String,
    exit_on_error: bool,
    verbose: bool,
    quiet: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            host: "127.0.0.1".to_string(),
            port: 50000,
            user: "monetdb".to_string(),
            database: "monetdb".to_string(),
            schema: None,
            role: None,
            command: None,
            file: None,
            format: "sql".to_string(),
            exit_on_error: false,
            verbose: false,
            quiet: false,
        }
    }
}

fn usage() -> ! {
    eprintln!(
        "Usage: msql [options]\n\
         \n\
         \x20 -h, --host HOST        host to connect to (default 127.0.0.1)\n\
         \x20 -p, --port PORT        port to connect to (default 50000)\n\
         \x20 -u, --username USER    username to connect as (default monetdb)\n\
         \x20 -d, --database DB      database to connect to (default monetdb)\n\
         \x20 -s, --schema SCHEMA    schema to use when connecting\n\
         \x20 -r, --role ROLE        role to use when connecting\n\
         \x20 -c COMMAND             executes the command and exits\n\
         \x20 -f, --file FILE        executes the file and exits\n\
         \x20 --format FORMAT        output format (sql|raw|expanded|trash)\n\
         \x20 --exit-on-error        exit on the first error\n\
         \x20 --verbose              verbose logging\n\
         \x20 --quiet                quiet logging\n\
         \x20 --help                 show this help screen"
    );
    process::exit(1);
}

fn parse_options(args: Vec<String>) -> Options {
    let mut options = Options::default();

    let mut take = |i: &mut usize, args: &[String]| -> String {
        *i += 1;
        match args.get(*i) {
            Some(value) => value.clone(),
            None => usage(),
        }
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--host" => options.host = take(&mut i, &args),
            "-p" | "--port" => {
                options.port = match take(&mut i, &args).parse() {
                    Ok(port) => port,
                    Err(_) => usage(),
                }
            }
            "-u" | "--username" => options.user = take(&mut i, &args),
            "-d" | "--database" => options.database = take(&mut i, &args),
            "-s" | "--schema" => options.schema = Some(take(&mut i, &args)),
            "-r" | "--role" => options.role = Some(take(&mut i, &args)),
            "-c" => options.command = Some(take(&mut i, &args)),
            "-f" | "--file" => options.file = Some(take(&mut i, &args)),
            "--format" => options.format = take(&mut i, &args),
            "--exit-on-error" => options.exit_on_error = true,
            "--verbose" => options.verbose = true,
            "--quiet" => options.quiet = true,
            "--help" => usage(),
            _ => usage(),
        }
        i += 1;
    }
    options
}

fn main() {
    let options = parse_options(std::env::args().skip(1).collect());

    let level = if options.verbose {
        LevelFilter::INFO
    } else if options.quiet {
        LevelFilter::OFF
    } else {
        LevelFilter::ERROR
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let preferences = preferences::load();

    let fingerprint = format!(
        "{}:{}:{}:{}:",
        options.host, options.port, options.database, options.user
    );
    let config = Config {
        host: format!("{}:{}", options.host, options.port),
        user: options.user.clone(),
        password: password::get(&preferences, &fingerprint),
        database: options.database.clone(),
        schema: options.schema.clone(),
        role: options.role.clone(),
    };

    let conn = match Connection::connect(&config) {
        Ok(conn) => conn,
        Err(err) => {
            error!(host = %config.host, context = "connect to database", "{err}");
            process::exit(1);
        }
    };

    let mut context = ShellContext::new(conn);
    context.timing = preferences.timing;
    context.format = Format::parse(&options.format).unwrap_or(Format::Sql);
    context.exit_on_error = options.exit_on_error;
    tracing::info!(
        version = %context.version(),
        release = %context.release(),
        "connected"
    );

    // -c, -f or piped stdin run to completion and exit
    if let Some(input) = batch_input(&options) {
        run_batch(&mut context, &input);
        process::exit(0);
    }

    let prompt = context.template(&preferences.prompt);
    let history_file = context.template(&preferences.history_file);

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            error!(context = "editor initialization", "{err}");
            process::exit(1);
        }
    };
    if !history_file.is_empty() {
        let _ = editor.load_history(&history_file);
    }

    loop {
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return,
            Err(err) => {
                error!(context = "read line", "{err}");
                process::exit(1);
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with('\\') {
            commands::dispatch(&mut context, line.trim_end());
        } else {
            run_statement(&mut editor, &mut context, line + "\n", &history_file);
        }
    }
}

/// Pulls more lines until the assembler sees a full statement, then
/// executes it. Residual input after the semicolon starts over as the
/// opening line of a fresh statement.
fn run_statement(
    editor: &mut DefaultEditor,
    context: &mut ShellContext,
    mut line: String,
    history_file: &str,
) {
    let mut assembler = StatementAssembler::new();
    loop {
        match assembler.push_line(&line) {
            LineStep::Command => {
                commands::dispatch(context, line.trim_end());
                return;
            }
            LineStep::Complete { residual } => {
                let sql = assembler.take();
                let _ = editor.add_history_entry(sql.as_str());
                if !history_file.is_empty() {
                    let _ = editor.append_history(&history_file);
                }
                context.run_sql(&sql);
                if !residual.is_empty() {
                    run_statement(editor, context, residual + "\n", history_file);
                }
                return;
            }
            LineStep::Incomplete => {
                line = match editor.readline("") {
                    Ok(line) => line + "\n",
                    Err(_) => return,
                };
            }
        }
    }
}

fn batch_input(options: &Options) -> Option<String> {
    if let Some(command) = &options.command {
        return Some(command.trim().to_string());
    }
    if let Some(file) = &options.file {
        match std::fs::read_to_string(file) {
            Ok(data) => return Some(data),
            Err(err) => {
                error!(context = "read input file", path = %file, "{err}");
                process::exit(1);
            }
        }
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut data = String::new();
    if let Err(err) = stdin.lock().read_to_string(&mut data) {
        error!(context = "read stdin", "{err}");
        process::exit(1);
    }
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}

fn run_batch(context: &mut ShellContext, input: &str) {
    let mut first = true;
    for statement in input.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        if !first {
            println!();
        }
        first = false;
        context.run_sql(&format!("{statement};"));
    }
}
