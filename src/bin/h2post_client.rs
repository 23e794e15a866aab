//! Demo client: one long-poll and one delayed upload over a single connection

use anyhow::Context;
use clap::Parser;
use h2longpoll::config::DEFAULT_PORT;
use h2longpoll::http::h2::{ClientEvent, H2Client, H2ClientBuilder, StreamId};
use h2longpoll::http::tls::{TlsConfig, TlsSessionOps, ALPN_H2};
use std::collections::HashSet;
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const UPLOAD_CONTENT_TYPE: &str = "multipart/form-data; boundary=nugusdk.boundary.24dfa2ab02147913";
const UPLOAD_CHUNK: usize = 100;
const GENERATED_UPLOAD_LEN: usize = 1000;

#[derive(Parser)]
#[command(name = "h2post-client")]
#[command(about = "Long-poll and upload against the h2longpoll server", long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// File to upload to /post (generated when missing)
    #[arg(long, value_name = "PATH", default_value = "dummy.dat")]
    file: PathBuf,

    /// Seconds to wait before starting the upload
    #[arg(long, value_name = "SECS", default_value_t = 7)]
    post_after: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{}] {}", buf.timestamp_millis(), record.args()))
        .init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("client failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let upload = load_upload(&cli.file);

    let tls = TlsConfig::client()?
        .alpn(&[ALPN_H2])?
        .verify_peer(false)
        .build()?;
    let tcp = TcpStream::connect((cli.host.as_str(), cli.port))
        .with_context(|| format!("connecting to {}:{}", cli.host, cli.port))?;
    let session = tls.connect(tcp)?;
    log::info!("connected, ALPN {:?}", session.vars().alpn);

    let mut client = H2ClientBuilder::new()
        .authority(format!("{}:{}", cli.host, cli.port))
        .build(session)?;
    client.connect()?;

    let start = Instant::now();
    let post_after = Duration::from_secs(cli.post_after);
    let mut open: HashSet<StreamId> = HashSet::new();

    let get_id = client.get("/longPolling")?;
    log::info!("stream {}: GET /longPolling", get_id);
    open.insert(get_id);

    let mut post_id = None;
    while post_id.is_none() || !open.is_empty() {
        if post_id.is_none() && start.elapsed() >= post_after {
            let id = upload_file(&mut client, &upload)?;
            open.insert(id);
            post_id = Some(id);
        }

        let wait = if post_id.is_none() {
            post_after.saturating_sub(start.elapsed())
        } else {
            Duration::from_secs(1)
        };
        if let Some(event) = client.next_event(Some(wait))? {
            if event.ends_stream() {
                open.remove(&event.stream_id());
            }
            print_event(&event);
        }
    }

    log::info!("all streams finished after {:?}", start.elapsed());
    Ok(())
}

fn upload_file(client: &mut H2Client<TlsSessionOps>, upload: &[u8]) -> anyhow::Result<StreamId> {
    let id = client.open_stream("POST", "/post", &[("content-type", UPLOAD_CONTENT_TYPE)], false)?;
    log::info!("stream {}: POST /post ({} bytes)", id, upload.len());

    let mut chunks = upload.chunks(UPLOAD_CHUNK).peekable();
    if chunks.peek().is_none() {
        client.send_data(id, &[], true)?;
    }
    while let Some(chunk) = chunks.next() {
        log::info!("read {} bytes from file", chunk.len());
        client.send_data(id, chunk, chunks.peek().is_none())?;
    }
    Ok(id)
}

fn load_upload(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("{}: {}, uploading generated data", path.display(), e);
            (0..GENERATED_UPLOAD_LEN)
                .map(|i| b'a' + (i % 26) as u8)
                .collect()
        }
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Headers {
            stream_id,
            status,
            headers,
            end_stream,
        } => log::info!(
            "stream {}: headers status={:?} {} end_stream={}",
            stream_id,
            status,
            headers,
            end_stream
        ),
        ClientEvent::Data {
            stream_id,
            data,
            end_stream,
        } => log::info!(
            "stream {}: data {:?} end_stream={}",
            stream_id,
            String::from_utf8_lossy(data),
            end_stream
        ),
        ClientEvent::Reset { stream_id, code } => log::info!("stream {}: reset {}", stream_id, code),
        ClientEvent::GoAway {
            last_stream_id,
            code,
        } => log::info!("goaway last_stream_id={} {}", last_stream_id, code),
    }
}
