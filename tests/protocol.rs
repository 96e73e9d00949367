//! End-to-end tests against a scripted in-process MAPI server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use msql::{Config, Connection, Error, Param, Reply};

const CHALLENGE: &str = "s4lt:mserver:9:RIPEMD160,SHA512,SHA256:LIT:SHA512:";

const MAX_PAYLOAD: usize = 8190;

fn send_message(stream: &mut TcpStream, message: &str) {
    let mut data = message.as_bytes();
    while data.len() > MAX_PAYLOAD {
        let header = (MAX_PAYLOAD as u16) << 1;
        stream.write_all(&header.to_le_bytes()).unwrap();
        stream.write_all(&data[..MAX_PAYLOAD]).unwrap();
        data = &data[MAX_PAYLOAD..];
    }
    let header = ((data.len() as u16) << 1) | 1;
    stream.write_all(&header.to_le_bytes()).unwrap();
    stream.write_all(data).unwrap();
}

fn read_message(stream: &mut TcpStream) -> String {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).unwrap();
        let header = u16::from_le_bytes(header);
        let mut payload = vec![0u8; (header >> 1) as usize];
        stream.read_exact(&mut payload).unwrap();
        message.extend_from_slice(&payload);
        if header & 1 == 1 {
            break;
        }
    }
    String::from_utf8(message).unwrap()
}

/// Challenge, login, control negotiation. Panics (failing the test
/// from the server thread) if the client sends anything unexpected.
fn handshake(stream: &mut TcpStream) {
    send_message(stream, CHALLENGE);
    let login = read_message(stream);
    assert!(
        login.starts_with("LIT:tester:{SHA512}"),
        "unexpected login: {login}"
    );
    assert!(login.ends_with(":sql:demo:"), "unexpected login: {login}");
    send_message(stream, "");
    assert_eq!(read_message(stream), "Xreply_size -1\n");
    send_message(stream, "");
}

fn spawn<F>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(&mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        script(&mut stream);
    });
    (addr, handle)
}

fn config(host: &str) -> Config {
    Config {
        host: host.to_string(),
        user: "tester".to_string(),
        password: "pass".to_string(),
        database: "demo".to_string(),
        schema: None,
        role: None,
    }
}

#[test]
fn test_select_streams_rows() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        assert_eq!(read_message(stream), "sselect 1,2;");
        send_message(
            stream,
            "&1 0 1 2 1 0 245 106 3480\n\
             % sys.t,\tsys.t # table_name\n\
             % c1,\tc2 # name\n\
             % int,\tint # type\n\
             % 1,\t1 # length\n\
             [\t1,\t2\t]\n",
        );
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("select 1,2;").unwrap();
    match conn.read_reply().unwrap() {
        Reply::Query(rows) => {
            assert_eq!(rows.columns(), &["c1", "c2"]);
            assert_eq!(rows.meta().unwrap().row_count, 1);
            assert_eq!(rows.rows().unwrap(), vec![vec!["1", "2"]]);
        }
        _ => panic!("expected a query reply"),
    }
    server.join().unwrap();
}

#[test]
fn test_insert_reports_affected_rows() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        assert_eq!(read_message(stream), "sinsert into t values (1);");
        send_message(stream, "&2 1 -1 4 262 204 2090\n");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("insert into t values (1);").unwrap();
    match conn.read_reply().unwrap() {
        Reply::Affected { rows, meta } => {
            assert_eq!(rows, 1);
            assert_eq!(meta.unwrap().row_count, 1);
        }
        _ => panic!("expected an affected reply"),
    }
    server.join().unwrap();
}

#[test]
fn test_set_statement_acknowledged() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        assert_eq!(read_message(stream), "sset schema foo;");
        send_message(stream, "&3 ");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("set schema foo;").unwrap();
    assert!(matches!(
        conn.read_reply().unwrap(),
        Reply::Ok { meta: None }
    ));
    server.join().unwrap();
}

#[test]
fn test_prepare_exec_deallocate_order() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        assert_eq!(read_message(stream), "sprepare select ?;");
        send_message(stream, "&5 7 1 1 1\n% . # table_name");
        assert_eq!(read_message(stream), "sexec 7(1);");
        send_message(
            stream,
            "&1 0 1 1 1 0 11 12 13\n\
             % sys.t # table_name\n\
             % c1 # name\n\
             % int # type\n\
             % 1 # length\n\
             [\t1\t]\n",
        );
        assert_eq!(read_message(stream), "sdeallocate 7;");
        send_message(stream, "&3 ");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    // the returned rows come from the exec, not the prepare or the
    // deallocate acknowledgement
    let rows = conn.prepare_rows("select ?", &[Param::Int(1)]).unwrap();
    assert_eq!(rows, vec![vec!["1"]]);
    server.join().unwrap();
}

#[test]
fn test_empty_reply() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        assert_eq!(read_message(stream), "scall noop();");
        send_message(stream, "");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("call noop();").unwrap();
    assert!(matches!(conn.read_reply().unwrap(), Reply::Empty));
    server.join().unwrap();
}

#[test]
fn test_server_error_surfaces() {
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        let _ = read_message(stream);
        send_message(stream, "!42000!syntax error\n");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("selec;").unwrap();
    match conn.read_reply() {
        Err(Error::Server(message)) => assert_eq!(message, "42000!syntax error"),
        other => panic!("expected a server error, got {:?}", other.err()),
    }
    server.join().unwrap();
}

#[test]
fn test_redirect_is_chased() {
    let (target, target_server) = spawn(|stream| {
        // the client must start the handshake over on the new socket
        handshake(stream);
    });

    let redirect = format!("^mapi:mapi://{target}/demo\n");
    let (addr, proxy_server) = spawn(move |stream| {
        send_message(stream, CHALLENGE);
        let _ = read_message(stream);
        send_message(stream, &redirect);
    });

    Connection::connect(&config(&addr)).unwrap();
    proxy_server.join().unwrap();
    target_server.join().unwrap();
}

#[test]
fn test_merovingian_loop_gives_up() {
    let (addr, server) = spawn(|stream| {
        for _ in 0..10 {
            send_message(stream, CHALLENGE);
            let _ = read_message(stream);
            send_message(stream, "^mapi:merovingian:try again");
        }
    });

    match Connection::connect(&config(&addr)) {
        Err(Error::Driver { message, .. }) => {
            assert_eq!(message, "too many proxy login iterations")
        }
        other => panic!("expected the iteration cap, got {:?}", other.map(|_| ())),
    }
    server.join().unwrap();
}

#[test]
fn test_schema_and_role_configured() {
    let (addr, server) = spawn(|stream| {
        send_message(stream, CHALLENGE);
        let _ = read_message(stream);
        send_message(stream, "");
        assert_eq!(read_message(stream), "sset schema analytics;");
        send_message(stream, "&3 ");
        assert_eq!(read_message(stream), "sset role reader;");
        send_message(stream, "&3 ");
        assert_eq!(read_message(stream), "Xreply_size -1\n");
        send_message(stream, "");
    });

    let mut config = config(&addr);
    config.schema = Some("analytics".to_string());
    config.role = Some("reader".to_string());
    Connection::connect(&config).unwrap();
    server.join().unwrap();
}

#[test]
fn test_large_statement_spans_frames() {
    let padding = "x".repeat(20_000);
    let statement = format!("select '{padding}';");
    let expected = format!("s{statement}");

    let (addr, server) = spawn(move |stream| {
        handshake(stream);
        assert_eq!(read_message(stream), expected);
        send_message(stream, "&3 ");
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute(&statement).unwrap();
    assert!(matches!(
        conn.read_reply().unwrap(),
        Reply::Ok { meta: None }
    ));
    server.join().unwrap();
}

#[test]
fn test_row_batches_follow_frame_boundaries() {
    // one row per frame; the client must keep yielding batches until
    // the fin frame
    let (addr, server) = spawn(|stream| {
        handshake(stream);
        let _ = read_message(stream);

        let first = "&1 0 3 1 3 0 1 1 1\n\
                     % sys.t # table_name\n\
                     % c1 # name\n\
                     % int # type\n\
                     % 2 # length\n\
                     [\t10\t]\n";
        let frame = |payload: &[u8], fin: bool| {
            let header = ((payload.len() as u16) << 1) | (fin as u16);
            let mut wire = header.to_le_bytes().to_vec();
            wire.extend_from_slice(payload);
            wire
        };
        stream.write_all(&frame(first.as_bytes(), false)).unwrap();
        stream.write_all(&frame(b"[\t20\t]\n", false)).unwrap();
        stream.write_all(&frame(b"[\t30\t]\n", true)).unwrap();
    });

    let mut conn = Connection::connect(&config(&addr)).unwrap();
    conn.execute("select c1 from t;").unwrap();
    match conn.read_reply().unwrap() {
        Reply::Query(mut rows) => {
            let mut all = Vec::new();
            let mut batches = 0;
            while let Some(batch) = rows.next_batch().unwrap() {
                batches += 1;
                all.extend(batch);
            }
            assert_eq!(all, vec![vec!["10"], vec!["20"], vec!["30"]]);
            assert!(batches >= 2, "rows should stream in multiple batches");
        }
        _ => panic!("expected a query reply"),
    }
    server.join().unwrap();
}
