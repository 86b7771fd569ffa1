//! The fork-per-connection server driven end to end by signals.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use ipc_toolkit::config::{IpcConfig, ServerSettings};
use ipc_toolkit::lifecycle::bootstrap;
use ipc_toolkit::server::{ConnectionServer, EchoHandler, SharedState};

mod common;

struct RunningServer {
    pid: Pid,
    addr: SocketAddr,
    ipc: IpcConfig,
}

fn start_server(dir: &Path, shm_id: u8, sem_id: u8, config: &str) -> RunningServer {
    let config_file = dir.join("server.cfg");
    fs::write(&config_file, config).unwrap();

    let mut settings = ServerSettings::default();
    settings.listener.bind_address = "127.0.0.1:0".to_string();
    settings.config_file = config_file;
    settings.ipc = IpcConfig {
        path: dir.to_path_buf(),
        shm_id,
        sem_id,
    };

    let startup = bootstrap(&settings).unwrap();
    let addr = startup.listener.local_addr();
    let ipc = settings.ipc.clone();

    let pid = common::spawn_child(move || {
        let mut state = startup.state;
        ConnectionServer::new(startup.listener, &mut state, &settings.config_file, EchoHandler)
            .run()
            .is_ok()
    });

    RunningServer { pid, addr, ipc }
}

fn stop_server(server: RunningServer) {
    kill(server.pid, Signal::SIGTERM).unwrap();
    assert_eq!(common::exit_code(server.pid), 0);
    SharedState::attach(&server.ipc).unwrap().destroy().unwrap();
}

fn connect(addr: SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

fn greeting(addr: SocketAddr) -> String {
    let (_stream, mut reader) = connect(addr);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

#[test]
fn serves_echo_and_reloads_on_signal() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 61, 62, "max_clients = 5\n");

    let (mut stream, mut reader) = connect(server.addr);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("max_clients=5"), "greeting was {:?}", line);

    stream.write_all(b"ping\n").unwrap();
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "ping\n");
    drop(reader);
    drop(stream);

    fs::write(dir.path().join("server.cfg"), "max_clients = 9\nbacklog = 8\n").unwrap();
    kill(server.pid, Signal::SIGHUP).unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || greeting(server.addr).contains("max_clients=9")));
    let live = SharedState::attach(&server.ipc).unwrap().tunables().unwrap();
    assert_eq!(live.backlog, 8);

    stop_server(server);
}

#[test]
fn refuses_past_max_clients() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 63, 64, "max_clients = 1\n");

    let (first, mut first_reader) = connect(server.addr);
    let mut line = String::new();
    first_reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("hello"));

    let (_second, mut second_reader) = connect(server.addr);
    line.clear();
    second_reader.read_line(&mut line).unwrap();
    assert_eq!(line, "busy\n");

    drop(first_reader);
    drop(first);
    let state = SharedState::attach(&server.ipc).unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || state.snapshot().unwrap().client_count == 0));
    assert!(greeting(server.addr).starts_with("hello"));
    drop(state);

    stop_server(server);
}

#[test]
fn missing_config_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 65, 66, "max_clients = 4\n");
    assert!(greeting(server.addr).contains("max_clients=4"));

    fs::remove_file(dir.path().join("server.cfg")).unwrap();
    kill(server.pid, Signal::SIGHUP).unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || greeting(server.addr).contains("max_clients=1000")));

    stop_server(server);
}
